// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue engine: put, pop with stall reclaim and throttle retry, peek,
//! counts, per-state listings, pause, and unfail.

use crate::scored::page;
use crate::state::KernelState;
use qd_core::{
    Channel, Group, HistoryEntry, Job, JobId, JobSnapshot, JobState, KernelError, KernelResult,
    LogEvent, Notification, QueueName, Tag, ThrottleId, Timestamp, WorkerName,
};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Optional attributes of `queue.put`. Absent fields are carried through
/// when re-putting an existing job.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub priority: Option<i64>,
    pub tags: Option<Vec<Tag>>,
    pub retries: Option<i64>,
    pub depends: Option<Vec<JobId>>,
    pub throttles: Option<Vec<ThrottleId>>,
}

/// Per-queue job counts, reported by `queue.counts` / `queues.counts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueCounts {
    pub name: QueueName,
    pub paused: bool,
    pub waiting: usize,
    pub running: usize,
    pub stalled: usize,
    pub scheduled: usize,
    pub depends: usize,
    pub recurring: usize,
    pub throttled: usize,
}

impl KernelState {
    /// Put a job into a queue, creating it or moving it from wherever it
    /// currently is. Explicitly provided attributes replace; absent ones
    /// carry through the move.
    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &mut self,
        now: Timestamp,
        worker: &WorkerName,
        queue_name: &QueueName,
        jid: &JobId,
        klass: &str,
        data: &str,
        delay: f64,
        options: PutOptions,
    ) -> KernelResult<JobId> {
        let history_cap = self.config.max_job_history();
        let new_tags = options.tags.map(distinct);

        // Tear down the previous placement on a move.
        let mut displaced_worker: Option<WorkerName> = None;
        if self.jobs.contains_key(jid) {
            self.detach_from_queue(jid);
            let (old_worker, old_state, old_throttles, old_group) = {
                let job = self.job(jid)?;
                (
                    job.worker.clone(),
                    job.state,
                    job.throttles.clone(),
                    job.failure.as_ref().map(|failure| failure.group.clone()),
                )
            };
            if let Some(old_worker) = old_worker {
                self.end_lease(&old_worker, jid);
                displaced_worker = Some(old_worker);
            }
            self.release_throttles(now, jid, &old_throttles);
            if old_state == JobState::Failed {
                if let Some(group) = old_group {
                    self.remove_from_failure_group(&group, jid);
                }
            }
            if old_state == JobState::Complete {
                self.completed.remove(jid);
            }
            // An explicit depends list replaces the carried graph.
            if options.depends.is_some() {
                let old_deps = self.job(jid)?.dependencies.clone();
                for dep in &old_deps {
                    if let Some(dep_job) = self.jobs.get_mut(dep) {
                        dep_job.dependents.remove(jid);
                    }
                }
                self.job_mut(jid)?.dependencies.clear();
            }
        } else {
            self.jobs.insert(jid.clone(), Job::new(jid.clone(), klass, data));
        }

        // Reconcile the tag index before the record is updated.
        if let Some(new_tags) = &new_tags {
            let old_tags = self.job(jid)?.tags.clone();
            for tag in &old_tags {
                if !new_tags.contains(tag) {
                    self.untag(jid, tag);
                }
            }
            for tag in new_tags {
                if !old_tags.contains(tag) {
                    self.tag_job(now, jid, tag);
                }
            }
        }

        let implicit = queue_name.throttle_id();
        {
            let job = self.job_mut(jid)?;
            job.klass = klass.to_string();
            job.data = data.to_string();
            job.queue = Some(queue_name.clone());
            job.worker = None;
            job.expires = None;
            job.scheduled_at = None;
            if let Some(priority) = options.priority {
                job.priority = priority;
            }
            if let Some(retries) = options.retries {
                job.retries = retries;
            }
            job.remaining = job.retries;
            if let Some(tags) = new_tags {
                job.tags = tags;
            }
            // Stale implicit throttles from previous queues are dropped; the
            // current queue's is always cited last unless already present.
            let mut throttles = options.throttles.unwrap_or_else(|| job.throttles.clone());
            throttles.retain(|id| !id.is_queue_throttle() || *id == implicit);
            if !throttles.contains(&implicit) {
                throttles.push(implicit);
            }
            job.throttles = throttles;
            job.log_history(HistoryEntry::put(now, queue_name), history_cap);
        }

        // Resolve dependencies: nonexistent or completed jids count as done.
        let requested: Vec<JobId> = match options.depends {
            Some(depends) => depends,
            None => self.job(jid)?.dependencies.iter().cloned().collect(),
        };
        let mut unresolved: BTreeSet<JobId> = BTreeSet::new();
        for dep in requested {
            if dep == *jid {
                continue;
            }
            if let Some(dep_job) = self.jobs.get(&dep) {
                if dep_job.state != JobState::Complete {
                    unresolved.insert(dep);
                }
            }
        }
        for dep in &unresolved {
            if let Some(dep_job) = self.jobs.get_mut(dep) {
                dep_job.dependents.insert(jid.clone());
            }
        }

        // Placement.
        let seq = self.next_seq();
        let (priority, tracked) = {
            let job = self.job_mut(jid)?;
            job.dependencies = unresolved.clone();
            (job.priority, job.tracked)
        };
        let state = if !unresolved.is_empty() {
            self.queue_entry(queue_name).depends.insert(jid.clone());
            if delay > 0.0 {
                self.job_mut(jid)?.scheduled_at = Some(now + delay);
            }
            JobState::Depends
        } else if delay > 0.0 {
            self.queue_entry(queue_name).scheduled.insert(jid.clone(), now + delay);
            JobState::Scheduled
        } else {
            self.queue_entry(queue_name).work.push(jid.clone(), priority, now, seq);
            JobState::Waiting
        };
        self.job_mut(jid)?.state = state;
        debug!(jid = %jid, queue = %queue_name, state = %state, "put");

        self.emit(Notification::log(&LogEvent::Put {
            jid: jid.clone(),
            queue: queue_name.clone(),
        }));
        if tracked {
            self.emit(Notification::jid(Channel::Put, jid));
        }
        if let Some(old_worker) = displaced_worker {
            if old_worker != *worker {
                let lost = LogEvent::LockLost { jid: jid.clone(), worker: old_worker.clone() };
                self.emit(Notification::worker(&old_worker, &lost));
                self.emit(Notification::log(&lost));
            }
        }
        Ok(jid.clone())
    }

    /// `job.requeue`: put that insists the job already exists.
    #[allow(clippy::too_many_arguments)]
    pub fn requeue(
        &mut self,
        now: Timestamp,
        worker: &WorkerName,
        queue_name: &QueueName,
        jid: &JobId,
        klass: &str,
        data: &str,
        delay: f64,
        options: PutOptions,
    ) -> KernelResult<JobId> {
        self.job(jid)?;
        self.put(now, worker, queue_name, jid, klass, data, delay, options)
    }

    /// Pop up to `count` jobs for `worker`. Reclaims expired leases first,
    /// expands due recurring templates, promotes ready scheduled jobs, and
    /// walks the waiting order with the throttle retry budget.
    pub fn pop(
        &mut self,
        now: Timestamp,
        queue_name: &QueueName,
        worker: &WorkerName,
        count: usize,
    ) -> KernelResult<Vec<JobSnapshot>> {
        let Some(queue) = self.queues.get(queue_name) else { return Ok(Vec::new()) };
        if queue.paused {
            return Ok(Vec::new());
        }
        let grace = self.grace();
        let budget = self.config.max_pop_retry(queue_name);
        let mut popped: Vec<JobId> = Vec::new();

        // Reclaim expired leases, oldest expiry first. Bounded by demand so
        // a later pop picks up the rest.
        let expired: Vec<JobId> = queue
            .locks
            .members_le(now - grace)
            .into_iter()
            .take(count)
            .collect();
        for jid in expired {
            let exhausted = self.reclaim_lease(now, queue_name, &jid);
            if exhausted {
                continue;
            }
            let throttles = self.job(&jid)?.throttles.clone();
            match self.acquire_throttles(now, &jid, &throttles) {
                Ok(()) => {
                    self.assign_lease(now, queue_name, &jid, worker);
                    popped.push(jid);
                }
                Err(parked_on) => self.park_throttled(&jid, &parked_on),
            }
        }

        self.check_recurring(now, queue_name, count.saturating_sub(popped.len()));
        self.check_scheduled(now, queue_name);

        // Walk the waiting order one batch of candidates at a time. Each
        // processed batch consumes one unit of the retry budget, so a pop
        // whose candidates all land in throttle pending queues gives up
        // after `max-pop-retry` rounds instead of draining the queue.
        let mut attempts: u32 = 0;
        while popped.len() < count {
            let batch: Vec<JobId> = match self.queues.get(queue_name) {
                Some(queue) => queue
                    .work
                    .iter()
                    .take(count - popped.len())
                    .cloned()
                    .collect(),
                None => break,
            };
            if batch.is_empty() {
                break;
            }
            for jid in batch {
                if let Some(queue) = self.queues.get_mut(queue_name) {
                    queue.work.remove(&jid);
                }
                let throttles = self.job(&jid)?.throttles.clone();
                match self.acquire_throttles(now, &jid, &throttles) {
                    Ok(()) => {
                        self.assign_lease(now, queue_name, &jid, worker);
                        popped.push(jid);
                    }
                    Err(parked_on) => self.park_throttled(&jid, &parked_on),
                }
            }
            attempts += 1;
            if attempts >= budget {
                break;
            }
        }
        self.pop_snapshots(now, popped)
    }

    fn pop_snapshots(&self, now: Timestamp, jids: Vec<JobId>) -> KernelResult<Vec<JobSnapshot>> {
        jids.iter()
            .map(|jid| Ok(self.snapshot_of(self.job(jid)?, now)))
            .collect()
    }

    /// Strip an expired lease: chatter, lease teardown, one attempt burned.
    /// Returns true when the job failed out on exhausted retries.
    fn reclaim_lease(&mut self, now: Timestamp, queue_name: &QueueName, jid: &JobId) -> bool {
        let (old_worker, tracked) = {
            let Some(job) = self.jobs.get(jid) else { return true };
            (job.worker.clone(), job.tracked)
        };
        if let Some(queue) = self.queues.get_mut(queue_name) {
            queue.locks.remove(jid);
        }
        if tracked {
            self.emit(Notification::jid(Channel::Stalled, jid));
        }
        if let Some(old_worker) = &old_worker {
            self.end_lease(old_worker, jid);
            let lost = LogEvent::LockLost { jid: jid.clone(), worker: old_worker.clone() };
            self.emit(Notification::worker(old_worker, &lost));
            self.emit(Notification::log(&lost));
        }
        let remaining = {
            let Some(job) = self.jobs.get_mut(jid) else { return true };
            job.remaining -= 1;
            job.state = JobState::Stalled;
            job.worker = None;
            job.expires = None;
            job.remaining
        };
        if remaining < 0 {
            self.fail_exhausted(now, queue_name, jid, old_worker);
            true
        } else {
            false
        }
    }

    /// Retries ran out during a stall sweep: the job lands in the queue's
    /// failed-retries group.
    fn fail_exhausted(
        &mut self,
        now: Timestamp,
        queue_name: &QueueName,
        jid: &JobId,
        worker: Option<WorkerName>,
    ) {
        let group = queue_name.retry_failure_group();
        let message = format!("Job exhausted retries in queue \"{queue_name}\"");
        let worker = worker.unwrap_or_else(|| WorkerName::new(""));
        self.fail_job(now, jid, &worker, &group, &message);
    }

    /// Assign a fresh lease to `worker` and hand the job over.
    pub(crate) fn assign_lease(
        &mut self,
        now: Timestamp,
        queue_name: &QueueName,
        jid: &JobId,
        worker: &WorkerName,
    ) {
        let history_cap = self.config.max_job_history();
        let expires = now + self.config.heartbeat();
        let tracked = {
            let Some(job) = self.jobs.get_mut(jid) else { return };
            job.state = JobState::Running;
            job.worker = Some(worker.clone());
            job.expires = Some(expires);
            job.log_history(HistoryEntry::popped(now, worker), history_cap);
            job.tracked
        };
        self.queue_entry(queue_name).locks.insert(jid.clone(), expires);
        self.touch_worker(worker, now);
        if let Some(state) = self.workers.get_mut(worker) {
            state.jobs.insert(jid.clone(), expires);
        }
        if tracked {
            self.emit(Notification::jid(Channel::Popped, jid));
        }
        debug!(jid = %jid, worker = %worker, expires, "popped");
    }

    /// Throttle denial: park the job on the denying throttle's pending FIFO.
    fn park_throttled(&mut self, jid: &JobId, throttle: &ThrottleId) {
        let Some(job) = self.jobs.get_mut(jid) else { return };
        job.state = JobState::Throttled;
        let queue_name = job.queue.clone();
        if let Some(queue_name) = queue_name {
            self.queue_entry(&queue_name).throttled.insert(jid.clone());
        }
        self.throttles.entry(throttle.clone()).or_default().pending.insert(jid.clone());
    }

    /// Promote scheduled jobs whose ready time has passed.
    pub(crate) fn check_scheduled(&mut self, now: Timestamp, queue_name: &QueueName) {
        let ready = match self.queues.get(queue_name) {
            Some(queue) => queue.scheduled.members_le(now),
            None => return,
        };
        for jid in ready {
            let seq = self.next_seq();
            if let Some(queue) = self.queues.get_mut(queue_name) {
                queue.scheduled.remove(&jid);
            }
            let Some(job) = self.jobs.get_mut(&jid) else { continue };
            job.state = JobState::Waiting;
            job.scheduled_at = None;
            let priority = job.priority;
            self.queue_entry(queue_name).work.push(jid, priority, now, seq);
        }
    }

    /// Page through a queue without assigning leases: expired leases first
    /// (oldest first), then the waiting order. Due recurring templates are
    /// expanded and ready scheduled jobs promoted, exactly as in pop.
    pub fn peek(
        &mut self,
        now: Timestamp,
        queue_name: &QueueName,
        offset: usize,
        count: usize,
    ) -> KernelResult<Vec<JobSnapshot>> {
        if !self.queues.contains_key(queue_name) {
            return Ok(Vec::new());
        }
        self.check_recurring(now, queue_name, offset + count);
        self.check_scheduled(now, queue_name);
        let grace = self.grace();
        let Some(queue) = self.queues.get(queue_name) else { return Ok(Vec::new()) };
        let mut jids = queue.locks.members_le(now - grace);
        jids.extend(queue.work.iter().cloned());
        let window = page(jids.into_iter(), offset, count);
        window
            .iter()
            .map(|jid| Ok(self.snapshot_of(self.job(jid)?, now)))
            .collect()
    }

    pub fn queue_counts(&self, now: Timestamp, queue_name: &QueueName) -> QueueCounts {
        let grace = self.grace();
        match self.queues.get(queue_name) {
            None => QueueCounts {
                name: queue_name.clone(),
                paused: false,
                waiting: 0,
                running: 0,
                stalled: 0,
                scheduled: 0,
                depends: 0,
                recurring: 0,
                throttled: 0,
            },
            Some(queue) => {
                let stalled = queue.locks.count_le(now - grace);
                let ready = queue.scheduled.count_le(now);
                QueueCounts {
                    name: queue.name.clone(),
                    paused: queue.paused,
                    waiting: queue.work.len() + ready,
                    running: queue.locks.len() - stalled,
                    stalled,
                    scheduled: queue.scheduled.len() - ready,
                    depends: queue.depends.len(),
                    recurring: queue.recurring.len(),
                    throttled: queue.throttled.len(),
                }
            }
        }
    }

    /// Counts for every known queue, name ascending.
    pub fn queues_counts(&self, now: Timestamp) -> Vec<QueueCounts> {
        self.queues.keys().map(|name| self.queue_counts(now, name)).collect()
    }

    /// Queues that have ever received a put, lexicographically.
    pub fn queue_names(&self) -> Vec<QueueName> {
        self.queues.keys().cloned().collect()
    }

    pub fn queue_pause(&mut self, queue_name: &QueueName) {
        self.queue_entry(queue_name).paused = true;
    }

    pub fn queue_unpause(&mut self, queue_name: &QueueName) {
        self.queue_entry(queue_name).paused = false;
    }

    /// Jids of one queue in a given state, paginated.
    pub fn jobs_by_state(
        &self,
        now: Timestamp,
        state: &str,
        queue_name: &QueueName,
        offset: usize,
        count: usize,
    ) -> KernelResult<Vec<JobId>> {
        let grace = self.grace();
        let Some(queue) = self.queues.get(queue_name) else { return known_state(state, Vec::new()) };
        let jids: Vec<JobId> = match state {
            "waiting" => queue.work.iter().cloned().collect(),
            "running" => queue
                .locks
                .iter()
                .filter(|(_, expires)| *expires > now - grace)
                .map(|(jid, _)| jid.clone())
                .collect(),
            "stalled" => queue.locks.members_le(now - grace),
            "scheduled" => queue
                .scheduled
                .iter()
                .filter(|(_, ready)| *ready > now)
                .map(|(jid, _)| jid.clone())
                .collect(),
            "depends" => queue.depends.iter().cloned().collect(),
            "recurring" => queue.recurring.iter().map(|(jid, _)| jid.clone()).collect(),
            "throttled" => queue.throttled.iter().cloned().collect(),
            other => {
                return Err(KernelError::invalid(
                    "queue.jobsByState",
                    "state",
                    format!("unknown state: {other}"),
                ))
            }
        };
        Ok(page(jids.into_iter(), offset, count))
    }

    /// Move up to `count` of a failure group's oldest jobs back into a
    /// queue as fresh waiting jobs.
    pub fn unfail(
        &mut self,
        now: Timestamp,
        queue_name: &QueueName,
        group: &Group,
        count: usize,
    ) -> KernelResult<usize> {
        let history_cap = self.config.max_job_history();
        let drained = self.drain_failure_group(group, count);
        let moved = drained.len();
        for jid in drained {
            let seq = self.next_seq();
            let implicit = queue_name.throttle_id();
            let Some(job) = self.jobs.get_mut(&jid) else { continue };
            job.queue = Some(queue_name.clone());
            job.state = JobState::Waiting;
            job.worker = None;
            job.expires = None;
            job.failure = None;
            job.remaining = job.retries;
            job.throttles.retain(|id| !id.is_queue_throttle() || *id == implicit);
            if !job.throttles.contains(&implicit) {
                job.throttles.push(implicit);
            }
            job.log_history(HistoryEntry::put(now, queue_name), history_cap);
            let priority = job.priority;
            self.queue_entry(queue_name).work.push(jid, priority, now, seq);
        }
        debug!(queue = %queue_name, group = %group, moved, "unfail");
        Ok(moved)
    }
}

fn known_state(state: &str, empty: Vec<JobId>) -> KernelResult<Vec<JobId>> {
    match state {
        "waiting" | "running" | "stalled" | "scheduled" | "depends" | "recurring"
        | "throttled" => Ok(empty),
        other => Err(KernelError::invalid(
            "queue.jobsByState",
            "state",
            format!("unknown state: {other}"),
        )),
    }
}

fn distinct(tags: Vec<Tag>) -> Vec<Tag> {
    let mut seen: Vec<Tag> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
