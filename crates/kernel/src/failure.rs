// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure index: per-group jid lists for operator triage.

use crate::scored::page;
use crate::state::KernelState;
use qd_core::{Group, JobId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Page of `jobs.failedByGroup`, newest failures first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedPage {
    pub total: usize,
    pub jobs: Vec<JobId>,
}

impl KernelState {
    /// Record a fresh failure at the head of its group.
    pub(crate) fn push_failure(&mut self, group: &Group, jid: &JobId) {
        self.failures.entry(group.clone()).or_default().push_front(jid.clone());
    }

    /// Drop a jid from a group, retiring the group when it empties.
    pub(crate) fn remove_from_failure_group(&mut self, group: &Group, jid: &JobId) {
        if let Some(list) = self.failures.get_mut(group) {
            list.retain(|entry| entry != jid);
            if list.is_empty() {
                self.failures.remove(group);
            }
        }
    }

    /// Take up to `count` of the oldest jids out of a group.
    pub(crate) fn drain_failure_group(&mut self, group: &Group, count: usize) -> Vec<JobId> {
        let Some(list) = self.failures.get_mut(group) else { return Vec::new() };
        let take = count.min(list.len());
        let mut drained: Vec<JobId> = Vec::with_capacity(take);
        for _ in 0..take {
            match list.pop_back() {
                Some(jid) => drained.push(jid),
                None => break,
            }
        }
        if list.is_empty() {
            self.failures.remove(group);
        }
        drained
    }

    /// `failureGroups.counts`: group → failed-job count.
    pub fn failure_groups_counts(&self) -> BTreeMap<Group, usize> {
        self.failures.iter().map(|(group, list)| (group.clone(), list.len())).collect()
    }

    /// `jobs.failedByGroup`: paginated, newest failures first.
    pub fn failed_by_group(&self, group: &Group, offset: usize, count: usize) -> FailedPage {
        match self.failures.get(group) {
            None => FailedPage { total: 0, jobs: Vec::new() },
            Some(list) => FailedPage {
                total: list.len(),
                jobs: page(list.iter().cloned(), offset, count),
            },
        }
    }
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
