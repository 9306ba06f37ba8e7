// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The kernel's materialized state and cross-cutting teardown helpers.
//!
//! One `KernelState` holds everything a single store instance would: job
//! records, per-queue sub-indices, throttles, worker leases, tag and failure
//! indices, the completed-job window, tracking, settings, and the pattern
//! registries. Handlers are `impl KernelState` blocks spread across the
//! sibling modules; this module owns the aggregate and the helpers several
//! of them share.

use crate::patterns::PriorityPattern;
use crate::scored::{ScoredSet, WorkQueue};
use indexmap::IndexSet;
use qd_core::{
    Config, Group, Job, JobId, JobSnapshot, KernelError, KernelResult, Notification, QueueName,
    RecurringJob, Tag, ThrottleId, Timestamp, WorkerName,
};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Per-queue sub-stores. A job is in at most one of work / locks / scheduled
/// / depends / throttled; `stalled` shadows expired locks that the pop sweep
/// has already chewed through but not yet handed over.
#[derive(Debug, Clone)]
pub struct QueueState {
    pub(crate) name: QueueName,
    /// Waiting jobs in pop order.
    pub(crate) work: WorkQueue,
    /// Running jobs, scored by lease expiry.
    pub(crate) locks: ScoredSet<JobId>,
    /// Delayed jobs, scored by ready time.
    pub(crate) scheduled: ScoredSet<JobId>,
    /// Jobs blocked on dependencies.
    pub(crate) depends: IndexSet<JobId>,
    /// Jobs parked on a throttle's pending queue.
    pub(crate) throttled: IndexSet<JobId>,
    /// Recurring templates, scored by next spawn time.
    pub(crate) recurring: ScoredSet<JobId>,
    pub(crate) paused: bool,
}

impl QueueState {
    pub(crate) fn new(name: QueueName) -> Self {
        Self {
            name,
            work: WorkQueue::new(),
            locks: ScoredSet::new(),
            scheduled: ScoredSet::new(),
            depends: IndexSet::new(),
            throttled: IndexSet::new(),
            recurring: ScoredSet::new(),
            paused: false,
        }
    }
}

/// Settings half of a throttle; lives and dies independently of the
/// lock/pending membership below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ThrottleRecord {
    /// 0 means unlimited.
    pub maximum: i64,
    /// Lazy expiry deadline when the throttle was set with a TTL.
    pub expires_at: Option<Timestamp>,
}

/// A named concurrency throttle: optional settings record plus the jids
/// currently holding tokens and the FIFO of jids waiting for one.
#[derive(Debug, Clone, Default)]
pub struct ThrottleState {
    pub(crate) record: Option<ThrottleRecord>,
    pub(crate) locks: IndexSet<JobId>,
    pub(crate) pending: IndexSet<JobId>,
}

/// Leases held by one worker, scored by expiry.
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    pub(crate) jobs: ScoredSet<JobId>,
}

/// Everything the kernel persists, plus the per-operation event outbox.
#[derive(Debug, Clone, Default)]
pub struct KernelState {
    pub(crate) jobs: HashMap<JobId, Job>,
    pub(crate) recurring: HashMap<JobId, RecurringJob>,
    pub(crate) queues: BTreeMap<QueueName, QueueState>,
    pub(crate) throttles: HashMap<ThrottleId, ThrottleState>,
    pub(crate) workers: HashMap<WorkerName, WorkerState>,
    /// Known workers scored by last activity.
    pub(crate) worker_activity: ScoredSet<WorkerName>,
    /// Inverted index tag → jids, scored by tag time.
    pub(crate) tags: HashMap<Tag, ScoredSet<JobId>>,
    /// Tag popularity ranking, scored by job count.
    pub(crate) tag_counts: ScoredSet<Tag>,
    /// Failure group → jids, newest first.
    pub(crate) failures: BTreeMap<Group, VecDeque<JobId>>,
    /// Completed jobs scored by completion time; pruned by age and count.
    pub(crate) completed: ScoredSet<JobId>,
    pub(crate) tracked: IndexSet<JobId>,
    pub(crate) config: Config,
    pub(crate) identifier_patterns: BTreeMap<String, Vec<String>>,
    pub(crate) priority_patterns: Vec<PriorityPattern>,
    /// Monotonic insertion counter; tie-break of last resort in pop order.
    seq: u64,
    outbox: Vec<Notification>,
}

impl KernelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub(crate) fn emit(&mut self, notification: Notification) {
        self.outbox.push(notification);
    }

    /// Drain the outbox after a successful operation.
    pub(crate) fn take_outbox(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    /// Drop any notifications staged by a failed operation.
    pub(crate) fn clear_outbox(&mut self) {
        self.outbox.clear();
    }

    /// The queue, created on first reference.
    pub(crate) fn queue_entry(&mut self, name: &QueueName) -> &mut QueueState {
        self.queues
            .entry(name.clone())
            .or_insert_with(|| QueueState::new(name.clone()))
    }

    pub(crate) fn job(&self, jid: &JobId) -> KernelResult<&Job> {
        self.jobs
            .get(jid)
            .ok_or_else(|| KernelError::JobDoesNotExist { jid: jid.clone() })
    }

    pub(crate) fn job_mut(&mut self, jid: &JobId) -> KernelResult<&mut Job> {
        self.jobs
            .get_mut(jid)
            .ok_or_else(|| KernelError::JobDoesNotExist { jid: jid.clone() })
    }

    pub(crate) fn grace(&self) -> f64 {
        self.config.grace_period()
    }

    pub(crate) fn snapshot_of(&self, job: &Job, now: Timestamp) -> JobSnapshot {
        job.snapshot(now, self.grace())
    }

    /// Remove a job from every sub-store of its current queue. Does not
    /// touch throttles, workers, or cross-queue indices.
    pub(crate) fn detach_from_queue(&mut self, jid: &JobId) {
        let Some(queue_name) = self.jobs.get(jid).and_then(|job| job.queue.clone()) else {
            return;
        };
        if let Some(queue) = self.queues.get_mut(&queue_name) {
            queue.work.remove(jid);
            queue.locks.remove(jid);
            queue.scheduled.remove(jid);
            queue.depends.shift_remove(jid);
            queue.throttled.shift_remove(jid);
        }
    }

    /// Drop a lease from the worker's index.
    pub(crate) fn end_lease(&mut self, worker: &WorkerName, jid: &JobId) {
        if let Some(state) = self.workers.get_mut(worker) {
            state.jobs.remove(jid);
        }
    }

    /// Record worker activity and make sure it is registered.
    pub(crate) fn touch_worker(&mut self, worker: &WorkerName, now: Timestamp) {
        self.workers.entry(worker.clone()).or_default();
        self.worker_activity.insert(worker.clone(), now);
    }

    // -- config store --

    pub fn config_get(&self, key: &str) -> Option<serde_json::Value> {
        self.config.get(key)
    }

    pub fn config_get_all(&self) -> BTreeMap<String, serde_json::Value> {
        self.config.get_all()
    }

    pub fn config_set(&mut self, key: &str, value: serde_json::Value) {
        self.config.set(key, value.clone());
        self.emit(Notification::log(&qd_core::LogEvent::ConfigSet {
            option: key.to_string(),
            value,
        }));
    }

    pub fn config_unset(&mut self, key: &str) {
        self.config.unset(key);
        self.emit(Notification::log(&qd_core::LogEvent::ConfigUnset {
            option: key.to_string(),
        }));
    }

    /// Full teardown of a job record: queue sub-stores, lease, throttles,
    /// tag index, failure group, completed window, tracking, and the record
    /// itself. Emits nothing; callers stage their own chatter first.
    pub(crate) fn delete_job(&mut self, now: Timestamp, jid: &JobId) {
        self.detach_from_queue(jid);
        let Some(job) = self.jobs.get(jid) else { return };
        let worker = job.worker.clone();
        let throttles = job.throttles.clone();
        let tags = job.tags.clone();
        let failure_group = job.failure.as_ref().map(|failure| failure.group.clone());
        let dependencies = job.dependencies.clone();

        if let Some(worker) = worker {
            self.end_lease(&worker, jid);
        }
        self.release_throttles(now, jid, &throttles);
        for tag in &tags {
            self.untag(jid, tag);
        }
        if let Some(group) = failure_group {
            self.remove_from_failure_group(&group, jid);
        }
        for dependency in dependencies {
            if let Some(dep) = self.jobs.get_mut(&dependency) {
                dep.dependents.remove(jid);
            }
        }
        self.completed.remove(jid);
        self.tracked.shift_remove(jid);
        self.jobs.remove(jid);
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
