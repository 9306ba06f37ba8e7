// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The atomic invocation boundary.
//!
//! A [`Kernel`] owns the state behind a mutex; every `call` parses, executes,
//! and flushes events while holding the lock, so concurrent callers only
//! ever observe complete operations — the same guarantee a store-side script
//! engine would give.

use crate::dispatch::{execute, Command, Reply};
use crate::state::KernelState;
use parking_lot::Mutex;
use qd_core::{KernelResult, Notification};
use serde_json::Value;
use tracing::trace;

/// Result of one successful invocation: the reply plus the notifications
/// the operation published.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub reply: Reply,
    pub events: Vec<Notification>,
}

/// Shared handle to one kernel instance.
#[derive(Debug, Default)]
pub struct Kernel {
    state: Mutex<KernelState>,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke a command. `args[0]` is the logical timestamp `now`; the rest
    /// are positional arguments per the command's shape. Failed invocations
    /// leave no state change and publish no events.
    pub fn call(&self, command: &str, args: &[Value]) -> KernelResult<Outcome> {
        let (now, parsed) = Command::parse(command, args)?;
        trace!(command, now, "invoke");
        let mut state = self.state.lock();
        match execute(&mut state, now, parsed) {
            Ok(reply) => Ok(Outcome { reply, events: state.take_outbox() }),
            Err(error) => {
                state.clear_outbox();
                Err(error)
            }
        }
    }

    /// Direct access to the state under the lock, for embedders that prefer
    /// the typed API over the command surface.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
