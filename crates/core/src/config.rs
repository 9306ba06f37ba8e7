// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime settings with built-in defaults.

use crate::ids::QueueName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Settings store: caller overrides layered over the built-in defaults.
/// Unsetting an overridden default restores it; unsetting a free-form key
/// removes it entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    overrides: BTreeMap<String, Value>,
}

/// Built-in defaults. Keys not listed here default to absent.
fn default_for(key: &str) -> Option<Value> {
    match key {
        "application" => Some(Value::from("reqless")),
        "grace-period" => Some(Value::from(10)),
        "heartbeat" => Some(Value::from(60)),
        "jobs-history" => Some(Value::from(604_800)),
        "jobs-history-count" => Some(Value::from(50_000)),
        "max-job-history" => Some(Value::from(100)),
        "max-pop-retry" => Some(Value::from(1)),
        "max-worker-age" => Some(Value::from(86_400)),
        _ => None,
    }
}

const DEFAULT_KEYS: &[&str] = &[
    "application",
    "grace-period",
    "heartbeat",
    "jobs-history",
    "jobs-history-count",
    "max-job-history",
    "max-pop-retry",
    "max-worker-age",
];

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for `key`: override if set, else built-in default.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.overrides.get(key).cloned().or_else(|| default_for(key))
    }

    /// All defaults overlaid with every override.
    pub fn get_all(&self) -> BTreeMap<String, Value> {
        let mut all = BTreeMap::new();
        for key in DEFAULT_KEYS {
            if let Some(value) = default_for(key) {
                all.insert((*key).to_string(), value);
            }
        }
        for (key, value) in &self.overrides {
            all.insert(key.clone(), value.clone());
        }
        all
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.overrides.insert(key.into(), value);
    }

    pub fn unset(&mut self, key: &str) {
        self.overrides.remove(key);
    }

    /// Numeric read with coercion from numbers and numeric strings.
    fn number(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Default lease duration in seconds. May be negative, producing leases
    /// that are already expired when assigned.
    pub fn heartbeat(&self) -> f64 {
        self.number("heartbeat").unwrap_or(60.0)
    }

    /// Seconds past `expires` before a running job counts as stalled.
    pub fn grace_period(&self) -> f64 {
        self.number("grace-period").unwrap_or(10.0)
    }

    /// History entries retained per job.
    pub fn max_job_history(&self) -> usize {
        let cap = self.number("max-job-history").unwrap_or(100.0);
        (cap.max(1.0)) as usize
    }

    /// Throttle-denial budget for one pop call; the per-queue key
    /// `<queue>-max-pop-retry` overrides the global `max-pop-retry`.
    pub fn max_pop_retry(&self, queue: &QueueName) -> u32 {
        let scoped = format!("{queue}-max-pop-retry");
        let budget = self
            .number(&scoped)
            .or_else(|| self.number("max-pop-retry"))
            .unwrap_or(1.0);
        budget.max(1.0) as u32
    }

    /// Seconds of inactivity before a worker is dropped from listings.
    pub fn max_worker_age(&self) -> f64 {
        self.number("max-worker-age").unwrap_or(86_400.0)
    }

    /// Seconds a completed job is retained; negative means not at all.
    pub fn jobs_history(&self) -> f64 {
        self.number("jobs-history").unwrap_or(604_800.0)
    }

    /// Maximum retained completed jobs.
    pub fn jobs_history_count(&self) -> usize {
        self.number("jobs-history-count").unwrap_or(50_000.0).max(0.0) as usize
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
