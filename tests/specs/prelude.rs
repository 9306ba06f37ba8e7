// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness: a thin wrapper over the kernel's command surface.

use qd_core::KernelError;
use qd_kernel::{Kernel, Outcome};
pub use serde_json::{json, Value};

/// One kernel instance driven through `(command, now, args…)` calls.
pub struct Broker {
    kernel: Kernel,
}

impl Broker {
    pub fn new() -> Self {
        Self { kernel: Kernel::new() }
    }

    pub fn call(&self, command: &str, args: &[Value]) -> Result<Outcome, KernelError> {
        self.kernel.call(command, args)
    }

    /// Invoke and return the reply as JSON; panics on error.
    pub fn run(&self, command: &str, args: &[Value]) -> Value {
        match self.kernel.call(command, args) {
            Ok(outcome) => outcome.reply.to_value(),
            Err(err) => panic!("{command} failed: {err}"),
        }
    }

    /// Invoke and return the emitted chatter as (channel, payload) pairs.
    pub fn chatter(&self, command: &str, args: &[Value]) -> Vec<(String, Value)> {
        match self.kernel.call(command, args) {
            Ok(outcome) => outcome
                .events
                .into_iter()
                .map(|note| (note.channel.name(), note.payload))
                .collect(),
            Err(err) => panic!("{command} failed: {err}"),
        }
    }

    /// The error message of a call that must fail.
    pub fn error(&self, command: &str, args: &[Value]) -> String {
        match self.kernel.call(command, args) {
            Ok(_) => panic!("{command} unexpectedly succeeded"),
            Err(err) => err.to_string(),
        }
    }

    /// `queue.put` of a trivial job.
    pub fn put(&self, now: f64, queue: &str, jid: &str) {
        self.run(
            "queue.put",
            &[json!(now), json!("worker"), json!(queue), json!(jid), json!("klass"), json!({}), json!(0)],
        );
    }

    /// `queue.put` with trailing options, e.g. `["retries", 0]`.
    pub fn put_with(&self, now: f64, queue: &str, jid: &str, options: &[Value]) {
        let mut args = vec![
            json!(now),
            json!("worker"),
            json!(queue),
            json!(jid),
            json!("klass"),
            json!({}),
            json!(0),
        ];
        args.extend_from_slice(options);
        self.run("queue.put", &args);
    }

    /// Pop as `worker` and return the popped jids.
    pub fn pop(&self, now: f64, queue: &str, count: usize) -> Vec<String> {
        self.pop_as(now, queue, "worker", count)
    }

    pub fn pop_as(&self, now: f64, queue: &str, worker: &str, count: usize) -> Vec<String> {
        let reply = self.run(
            "queue.pop",
            &[json!(now), json!(queue), json!(worker), json!(count)],
        );
        jids_of(&reply)
    }

    pub fn complete(&self, now: f64, jid: &str, queue: &str) {
        self.run(
            "job.complete",
            &[json!(now), json!(jid), json!("worker"), json!(queue), json!({})],
        );
    }

    pub fn job(&self, now: f64, jid: &str) -> Value {
        self.run("job.get", &[json!(now), json!(jid)])
    }

    pub fn state_of(&self, now: f64, jid: &str) -> String {
        self.job(now, jid)["state"].as_str().unwrap_or_default().to_string()
    }
}

/// Extract the `jid` field of each entry in a job listing.
pub fn jids_of(reply: &Value) -> Vec<String> {
    reply
        .as_array()
        .map(|jobs| {
            jobs.iter()
                .map(|job| job["jid"].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}
