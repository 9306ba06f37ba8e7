// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-supplied identifier newtypes.

/// Prefix of the implicit per-queue throttle id.
const QUEUE_THROTTLE_PREFIX: &str = "ql:q:";

crate::define_name! {
    /// Caller-supplied unique identifier of a job.
    pub struct JobId;
}

crate::define_name! {
    /// Name of a queue. Queues come into existence on first `put`.
    pub struct QueueName;
}

crate::define_name! {
    /// Name a worker identifies itself with when popping jobs.
    pub struct WorkerName;
}

crate::define_name! {
    /// Identifier of a named concurrency throttle.
    pub struct ThrottleId;
}

crate::define_name! {
    /// Free-form tag attached to jobs.
    pub struct Tag;
}

crate::define_name! {
    /// Failure group label under which failed jobs are indexed.
    pub struct Group;
}

impl JobId {
    /// The jid of the `n`-th child spawned from a recurring template.
    pub fn spawned(parent: &JobId, n: u64) -> JobId {
        JobId::new(format!("{parent}-{n}"))
    }
}

impl QueueName {
    /// The implicit throttle every job in this queue cites (`ql:q:<queue>`).
    pub fn throttle_id(&self) -> ThrottleId {
        ThrottleId::new(format!("{QUEUE_THROTTLE_PREFIX}{self}"))
    }

    /// Failure group used when a job exhausts its retries in this queue.
    pub fn retry_failure_group(&self) -> Group {
        Group::new(format!("failed-retries-{self}"))
    }
}

impl ThrottleId {
    /// True for implicit per-queue throttle ids (`ql:q:<queue>`).
    pub fn is_queue_throttle(&self) -> bool {
        self.as_str().starts_with(QUEUE_THROTTLE_PREFIX)
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
