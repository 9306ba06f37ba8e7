// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job record, state machine, history, and failure metadata.

use crate::ids::{Group, JobId, QueueName, Tag, ThrottleId, WorkerName};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Default retry allowance for jobs put without an explicit `retries`.
pub const DEFAULT_RETRIES: i64 = 5;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Eligible to be popped.
    Waiting,
    /// Delayed; becomes waiting once its ready time passes.
    Scheduled,
    /// Blocked on unfinished dependencies.
    Depends,
    /// Leased to a worker.
    Running,
    /// Lease expired (or timed out) but not yet handed to a new worker.
    Stalled,
    /// Parked in a throttle's pending queue.
    Throttled,
    Complete,
    Failed,
    /// Recurring template, not a runnable job.
    Recur,
}

impl std::fmt::Display for JobState {
    /// Lowercase state names; callers match these in error messages.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobState::Waiting => "waiting",
            JobState::Scheduled => "scheduled",
            JobState::Depends => "depends",
            JobState::Running => "running",
            JobState::Stalled => "stalled",
            JobState::Throttled => "throttled",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Recur => "recur",
        })
    }
}

/// Why and when a job last failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub group: Group,
    pub message: String,
    pub when: Timestamp,
    pub worker: WorkerName,
}

/// One entry in a job's bounded history.
///
/// Serialized flat as `{"what": …, "when": …, …extra}` so typed entries
/// (`put`, `popped`, `done`, `failed`, `timed-out`) and arbitrary entries
/// appended via `job.log` share one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub what: String,
    pub when: Timestamp,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HistoryEntry {
    pub fn put(when: Timestamp, queue: &QueueName) -> Self {
        Self::custom("put", when, [("queue", Value::from(queue.as_str()))])
    }

    pub fn popped(when: Timestamp, worker: &WorkerName) -> Self {
        Self::custom("popped", when, [("worker", Value::from(worker.as_str()))])
    }

    pub fn done(when: Timestamp) -> Self {
        Self::custom("done", when, [])
    }

    pub fn failed(when: Timestamp, group: &Group, worker: &WorkerName) -> Self {
        Self::custom(
            "failed",
            when,
            [
                ("group", Value::from(group.as_str())),
                ("worker", Value::from(worker.as_str())),
            ],
        )
    }

    pub fn timed_out(when: Timestamp) -> Self {
        Self::custom("timed-out", when, [])
    }

    pub fn custom(
        what: impl Into<String>,
        when: Timestamp,
        extra: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> Self {
        Self {
            what: what.into(),
            when,
            extra: extra.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    /// Arbitrary entry from `job.log`, with caller-supplied payload keys.
    pub fn logged(what: impl Into<String>, when: Timestamp, data: Map<String, Value>) -> Self {
        Self { what: what.into(), when, extra: data }
    }
}

/// A job record. The kernel's primary aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub jid: JobId,
    pub klass: String,
    /// Opaque payload; always valid JSON text, never interpreted.
    pub data: String,
    /// Current queue. `None` once the job reaches `complete`.
    pub queue: Option<QueueName>,
    pub state: JobState,
    /// Leasing worker while running; kept on a stalled lease until re-pop.
    pub worker: Option<WorkerName>,
    pub priority: i64,
    /// Distinct tags in insertion order.
    pub tags: Vec<Tag>,
    /// Throttle ids in acquisition order; the implicit per-queue throttle is
    /// always present after a put.
    pub throttles: Vec<ThrottleId>,
    /// Unfinished dependencies (jids this job waits on).
    pub dependencies: BTreeSet<JobId>,
    /// Jobs waiting on this one.
    pub dependents: BTreeSet<JobId>,
    pub retries: i64,
    pub remaining: i64,
    pub failure: Option<Failure>,
    pub history: Vec<HistoryEntry>,
    pub tracked: bool,
    /// Lease deadline while running.
    pub expires: Option<Timestamp>,
    /// Ready time carried while the job sits in `depends` with a delay.
    pub scheduled_at: Option<Timestamp>,
    /// Parent recurring template, for spawned children.
    pub spawned_from_jid: Option<JobId>,
}

impl Job {
    /// Fresh record with default attributes; the put flow fills in the rest.
    pub fn new(jid: JobId, klass: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            jid,
            klass: klass.into(),
            data: data.into(),
            queue: None,
            state: JobState::Waiting,
            worker: None,
            priority: 0,
            tags: Vec::new(),
            throttles: Vec::new(),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            retries: DEFAULT_RETRIES,
            remaining: DEFAULT_RETRIES,
            failure: None,
            history: Vec::new(),
            tracked: false,
            expires: None,
            scheduled_at: None,
            spawned_from_jid: None,
        }
    }

    /// Append a history entry, dropping the oldest non-initial entries once
    /// `cap` is exceeded. The earliest entry (the original put) survives.
    pub fn log_history(&mut self, entry: HistoryEntry, cap: usize) {
        self.history.push(entry);
        while self.history.len() > cap && self.history.len() > 1 {
            self.history.remove(1);
        }
    }

    /// Add a tag; returns false when the job already carries it.
    pub fn add_tag(&mut self, tag: &Tag) -> bool {
        if self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.clone());
        true
    }

    /// Remove a tag; returns false when absent.
    pub fn remove_tag(&mut self, tag: &Tag) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// The state a reader observes at `now`: a running job whose lease
    /// expired past the grace period reads as stalled even before the next
    /// pop sweeps it.
    pub fn observed_state(&self, now: Timestamp, grace: f64) -> JobState {
        match (self.state, self.expires) {
            (JobState::Running, Some(expires)) if expires + grace <= now => JobState::Stalled,
            (state, _) => state,
        }
    }

    /// Materialize the wire view returned by `job.get`, `pop`, and `peek`.
    pub fn snapshot(&self, now: Timestamp, grace: f64) -> JobSnapshot {
        JobSnapshot {
            jid: self.jid.clone(),
            klass: self.klass.clone(),
            data: self.data.clone(),
            queue: self.queue.as_ref().map(|q| q.to_string()).unwrap_or_default(),
            state: self.observed_state(now, grace),
            worker: self.worker.as_ref().map(|w| w.to_string()).unwrap_or_default(),
            priority: self.priority,
            tags: self.tags.clone(),
            throttles: self.throttles.clone(),
            dependencies: self.dependencies.iter().cloned().collect(),
            dependents: self.dependents.iter().cloned().collect(),
            retries: self.retries,
            remaining: self.remaining,
            failure: self.failure.clone(),
            history: self.history.clone(),
            tracked: self.tracked,
            expires: self.expires.unwrap_or(0.0),
            spawned_from_jid: self.spawned_from_jid.clone(),
        }
    }
}

/// Wire view of a job. All collection-valued fields are sequences, never
/// empty-object placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub jid: JobId,
    pub klass: String,
    pub data: String,
    /// Empty string once the job is complete.
    pub queue: String,
    pub state: JobState,
    /// Empty string unless leased.
    pub worker: String,
    pub priority: i64,
    pub tags: Vec<Tag>,
    pub throttles: Vec<ThrottleId>,
    pub dependencies: Vec<JobId>,
    pub dependents: Vec<JobId>,
    pub retries: i64,
    pub remaining: i64,
    pub failure: Option<Failure>,
    pub history: Vec<HistoryEntry>,
    pub tracked: bool,
    /// 0 unless leased.
    pub expires: Timestamp,
    pub spawned_from_jid: Option<JobId>,
}

/// Test builder over a fresh default record: `Job::builder()` starts from
/// `Job::new("jid", "klass", "{}")` and setters overwrite individual fields.
#[cfg(any(test, feature = "test-support"))]
pub struct JobBuilder {
    job: Job,
}

#[cfg(any(test, feature = "test-support"))]
impl JobBuilder {
    pub fn jid(mut self, v: impl Into<JobId>) -> Self {
        self.job.jid = v.into();
        self
    }

    pub fn klass(mut self, v: impl Into<String>) -> Self {
        self.job.klass = v.into();
        self
    }

    pub fn data(mut self, v: impl Into<String>) -> Self {
        self.job.data = v.into();
        self
    }

    pub fn queue(mut self, v: impl Into<QueueName>) -> Self {
        self.job.queue = Some(v.into());
        self
    }

    pub fn state(mut self, v: JobState) -> Self {
        self.job.state = v;
        self
    }

    pub fn worker(mut self, v: impl Into<WorkerName>) -> Self {
        self.job.worker = Some(v.into());
        self
    }

    pub fn priority(mut self, v: i64) -> Self {
        self.job.priority = v;
        self
    }

    pub fn tags(mut self, v: Vec<Tag>) -> Self {
        self.job.tags = v;
        self
    }

    pub fn throttles(mut self, v: Vec<ThrottleId>) -> Self {
        self.job.throttles = v;
        self
    }

    pub fn dependencies(mut self, v: BTreeSet<JobId>) -> Self {
        self.job.dependencies = v;
        self
    }

    pub fn dependents(mut self, v: BTreeSet<JobId>) -> Self {
        self.job.dependents = v;
        self
    }

    /// Sets both the allowance and the remaining attempts.
    pub fn retries(mut self, v: i64) -> Self {
        self.job.retries = v;
        self.job.remaining = v;
        self
    }

    pub fn remaining(mut self, v: i64) -> Self {
        self.job.remaining = v;
        self
    }

    pub fn failure(mut self, v: Failure) -> Self {
        self.job.failure = Some(v);
        self
    }

    pub fn history(mut self, v: Vec<HistoryEntry>) -> Self {
        self.job.history = v;
        self
    }

    pub fn tracked(mut self, v: bool) -> Self {
        self.job.tracked = v;
        self
    }

    pub fn expires(mut self, v: Timestamp) -> Self {
        self.job.expires = Some(v);
        self
    }

    pub fn scheduled_at(mut self, v: Timestamp) -> Self {
        self.job.scheduled_at = Some(v);
        self
    }

    pub fn spawned_from_jid(mut self, v: impl Into<JobId>) -> Self {
        self.job.spawned_from_jid = Some(v.into());
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Job {
    /// Builder with test defaults.
    pub fn builder() -> JobBuilder {
        JobBuilder { job: Job::new(JobId::new("jid"), "klass", "{}") }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
