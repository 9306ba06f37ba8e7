// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recurring job templates.

use crate::ids::{JobId, QueueName, Tag, ThrottleId};
use serde::{Deserialize, Serialize};

/// A recurring template. Lives in its queue's `recurring` index with a
/// next-spawn score; each spawn produces a child job `<jid>-<count+1>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringJob {
    pub jid: JobId,
    pub queue: QueueName,
    pub klass: String,
    /// Opaque payload copied onto every child.
    pub data: String,
    /// Seconds between spawns.
    pub interval: f64,
    /// Retry allowance granted to children.
    pub retries: i64,
    pub priority: i64,
    /// Cap on missed intervals expanded at once; 0 means no cap.
    pub backlog: i64,
    pub tags: Vec<Tag>,
    /// Copied verbatim onto children; carries the implicit queue throttle.
    pub throttles: Vec<ThrottleId>,
    /// Number of children spawned so far.
    pub count: u64,
}

impl RecurringJob {
    pub fn snapshot(&self) -> RecurringSnapshot {
        RecurringSnapshot {
            jid: self.jid.clone(),
            queue: self.queue.clone(),
            klass: self.klass.clone(),
            data: self.data.clone(),
            interval: self.interval,
            retries: self.retries,
            priority: self.priority,
            backlog: self.backlog,
            tags: self.tags.clone(),
            throttles: self.throttles.clone(),
            count: self.count,
            state: "recur",
        }
    }
}

/// Wire view of a template, as returned by `recurringJob.get`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringSnapshot {
    pub jid: JobId,
    pub queue: QueueName,
    pub klass: String,
    pub data: String,
    pub interval: f64,
    pub retries: i64,
    pub priority: i64,
    pub backlog: i64,
    pub tags: Vec<Tag>,
    pub throttles: Vec<ThrottleId>,
    pub count: u64,
    pub state: &'static str,
}
