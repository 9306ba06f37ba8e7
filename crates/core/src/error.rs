// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel error type.
//!
//! Messages deliberately carry stable substrings (`does not exist`,
//! `waiting`, `another worker`, `is a dependency`, `in the depends state`, …)
//! because callers match on them.

use crate::ids::{JobId, QueueName, WorkerName};
use crate::job::JobState;
use thiserror::Error;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// Missing or malformed `now` argument.
    #[error("{command}(): time argument missing or not a nonnegative number")]
    BadTime { command: String },

    #[error("{command}(): Arg {arg:?} missing")]
    MissingArgument { command: &'static str, arg: &'static str },

    #[error("{command}(): Arg {arg:?} {reason}")]
    InvalidArgument { command: &'static str, arg: &'static str, reason: String },

    #[error("Job does not exist: {jid}")]
    JobDoesNotExist { jid: JobId },

    #[error("Recurring job does not exist: {jid}")]
    RecurringJobDoesNotExist { jid: JobId },

    /// Operation requires a running job; names the state it found.
    #[error("Job {jid} not currently running: {state}")]
    JobNotRunning { jid: JobId, state: JobState },

    #[error("Job {jid} has been handed out to another worker: {worker}")]
    AnotherWorker { jid: JobId, worker: WorkerName },

    #[error("Job {jid} running in another queue: {queue}")]
    AnotherQueue { jid: JobId, queue: QueueName },

    #[error("{jid} is a dependency of {dependent} but is not mentioned to be canceled")]
    IsADependency { jid: JobId, dependent: JobId },

    #[error("Job {jid} not in the depends state")]
    NotInDependsState { jid: JobId },
}

impl KernelError {
    /// Helper for malformed-argument failures in the dispatcher.
    pub fn invalid(
        command: &'static str,
        arg: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        KernelError::InvalidArgument { command, arg, reason: reason.into() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
