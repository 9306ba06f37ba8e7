// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue pattern registries consulted by external schedulers.
//!
//! The kernel stores and serves these; it never consults them itself.

use crate::state::KernelState;
use qd_core::KernelResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key whose identifier patterns apply when no specific entry matches.
const DEFAULT_IDENTIFIER: &str = "default";

/// One priority rule: queues matching `pattern`, optionally drained fairly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityPattern {
    pub fairly: bool,
    pub pattern: Vec<String>,
}

fn default_identifier_patterns() -> Vec<String> {
    vec!["*".to_string()]
}

impl KernelState {
    /// All identifier patterns; the `default` entry is always present.
    pub fn identifier_patterns_get_all(&self) -> BTreeMap<String, Vec<String>> {
        let mut all = self.identifier_patterns.clone();
        all.entry(DEFAULT_IDENTIFIER.to_string()).or_insert_with(default_identifier_patterns);
        all
    }

    /// Replace the registry. Entries with empty pattern lists are dropped,
    /// which also resets an invalid `default` back to `["*"]`.
    pub fn identifier_patterns_set_all(
        &mut self,
        entries: Vec<(String, Vec<String>)>,
    ) -> KernelResult<()> {
        self.identifier_patterns = entries
            .into_iter()
            .filter(|(_, patterns)| !patterns.is_empty())
            .collect();
        Ok(())
    }

    pub fn priority_patterns_get_all(&self) -> Vec<PriorityPattern> {
        self.priority_patterns.clone()
    }

    /// Replace the ordered priority rules; empty patterns are dropped.
    pub fn priority_patterns_set_all(&mut self, entries: Vec<PriorityPattern>) -> KernelResult<()> {
        self.priority_patterns = entries
            .into_iter()
            .filter(|entry| !entry.pattern.is_empty())
            .collect();
        Ok(())
    }
}

#[cfg(test)]
#[path = "patterns_tests.rs"]
mod tests;
