// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! qd-core: domain types for the queued broker kernel

pub mod macros;

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod recurring;
pub mod time;

pub use config::Config;
pub use error::{KernelError, KernelResult};
pub use event::{Channel, LogEvent, Notification};
pub use ids::{Group, JobId, QueueName, Tag, ThrottleId, WorkerName};
#[cfg(any(test, feature = "test-support"))]
pub use job::JobBuilder;
pub use job::{Failure, HistoryEntry, Job, JobSnapshot, JobState};
pub use recurring::{RecurringJob, RecurringSnapshot};
pub use time::Timestamp;
