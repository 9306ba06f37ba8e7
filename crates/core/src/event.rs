// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pub/sub notifications emitted alongside state changes.
//!
//! Every mutating operation batches its notifications into an outbox that is
//! flushed only when the operation succeeds, so partial mutations never
//! produce chatter.

use crate::ids::{Group, JobId, QueueName, WorkerName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Destination channel of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Structured log stream (`ql:log`).
    Log,
    /// Bare-jid tracking channels.
    Put,
    Popped,
    Completed,
    Failed,
    Stalled,
    Canceled,
    Track,
    Untrack,
    /// Per-worker channel (`ql:w:<worker>`).
    Worker(WorkerName),
}

impl Channel {
    /// The channel name as published on the wire.
    pub fn name(&self) -> String {
        match self {
            Channel::Log => "ql:log".to_string(),
            Channel::Put => "ql:put".to_string(),
            Channel::Popped => "ql:popped".to_string(),
            Channel::Completed => "ql:completed".to_string(),
            Channel::Failed => "ql:failed".to_string(),
            Channel::Stalled => "ql:stalled".to_string(),
            Channel::Canceled => "ql:canceled".to_string(),
            Channel::Track => "ql:track".to_string(),
            Channel::Untrack => "ql:untrack".to_string(),
            Channel::Worker(w) => format!("ql:w:{w}"),
        }
    }
}

/// Structured payloads for `ql:log` (and mirrored per-worker) events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    Put {
        jid: JobId,
        queue: QueueName,
    },
    Completed {
        jid: JobId,
        queue: QueueName,
    },
    /// Completed-and-requeued into `to`.
    Advanced {
        jid: JobId,
        queue: QueueName,
        to: QueueName,
    },
    Failed {
        jid: JobId,
        group: Group,
        message: String,
        worker: WorkerName,
    },
    LockLost {
        jid: JobId,
        worker: WorkerName,
    },
    /// `worker` is the owner at cancellation time, or empty.
    Canceled {
        jid: JobId,
        queue: QueueName,
        worker: WorkerName,
    },
    ConfigSet {
        option: String,
        value: Value,
    },
    ConfigUnset {
        option: String,
    },
}

/// One notification: a channel plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: Channel,
    pub payload: Value,
}

impl Notification {
    /// Structured event on the log channel.
    pub fn log(event: &LogEvent) -> Self {
        Self { channel: Channel::Log, payload: payload_of(event) }
    }

    /// Bare jid on one of the tracking channels.
    pub fn jid(channel: Channel, jid: &JobId) -> Self {
        Self { channel, payload: Value::from(jid.as_str()) }
    }

    /// Structured event on a worker's private channel.
    pub fn worker(worker: &WorkerName, event: &LogEvent) -> Self {
        Self { channel: Channel::Worker(worker.clone()), payload: payload_of(event) }
    }
}

fn payload_of(event: &LogEvent) -> Value {
    // LogEvent carries no non-serializable values, so this cannot fail.
    serde_json::to_value(event).unwrap_or(Value::Null)
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
