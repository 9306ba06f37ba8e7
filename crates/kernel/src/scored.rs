// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered index primitives.
//!
//! [`ScoredSet`] mirrors the store's sorted-set primitive: one score per
//! member, iteration ordered by score then member. [`WorkQueue`] is the
//! waiting-order index: priority descending, then entry time ascending, then
//! insertion sequence.

use qd_core::JobId;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// f64 score with a total order. Scores never hold NaN in practice, but
/// `total_cmp` keeps the index well-defined regardless.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Score(f64);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorted set: unique members carrying an f64 score, iterated in
/// (score, member) order. Inserting an existing member re-scores it.
#[derive(Debug, Clone)]
pub struct ScoredSet<M: Clone + Ord + Hash> {
    scores: HashMap<M, f64>,
    ordered: BTreeSet<(Score, M)>,
}

impl<M: Clone + Ord + Hash> Default for ScoredSet<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Clone + Ord + Hash> ScoredSet<M> {
    pub fn new() -> Self {
        Self { scores: HashMap::new(), ordered: BTreeSet::new() }
    }

    pub fn insert(&mut self, member: M, score: f64) {
        if let Some(old) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(Score(old), member.clone()));
        }
        self.ordered.insert((Score(score), member));
    }

    pub fn remove(&mut self, member: &M) -> bool {
        match self.scores.remove(member) {
            Some(old) => self.ordered.remove(&(Score(old), member.clone())),
            None => false,
        }
    }

    pub fn score(&self, member: &M) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn contains(&self, member: &M) -> bool {
        self.scores.contains_key(member)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Ascending (score, member) iteration.
    pub fn iter(&self) -> impl Iterator<Item = (&M, f64)> {
        self.ordered.iter().map(|(score, member)| (member, score.0))
    }

    /// Descending (score, member) iteration.
    pub fn iter_desc(&self) -> impl Iterator<Item = (&M, f64)> {
        self.ordered.iter().rev().map(|(score, member)| (member, score.0))
    }

    /// Members with score ≤ `max`, ascending.
    pub fn members_le(&self, max: f64) -> Vec<M> {
        self.ordered
            .iter()
            .take_while(|(score, _)| score.0 <= max)
            .map(|(_, member)| member.clone())
            .collect()
    }

    /// Count of members with score ≤ `max`.
    pub fn count_le(&self, max: f64) -> usize {
        self.iter().take_while(|(_, score)| *score <= max).count()
    }
}

/// Waiting-order index. Pop order is priority descending, then entry time
/// ascending, then insertion sequence; `push_front` jumps the line entirely
/// (used when a timed-out job is put back at the head).
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    keys: HashMap<JobId, WorkKey>,
    ordered: BTreeSet<(WorkKey, JobId)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WorkKey {
    priority: i64,
    time: f64,
    seq: u64,
}

impl Eq for WorkKey {}

impl PartialOrd for WorkKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.time.total_cmp(&other.time))
            .then(self.seq.cmp(&other.seq))
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, jid: JobId, priority: i64, time: f64, seq: u64) {
        self.insert(jid, WorkKey { priority, time, seq });
    }

    /// Insert ahead of every normally-pushed job.
    pub fn push_front(&mut self, jid: JobId, seq: u64) {
        self.insert(jid, WorkKey { priority: i64::MAX, time: f64::NEG_INFINITY, seq });
    }

    fn insert(&mut self, jid: JobId, key: WorkKey) {
        if let Some(old) = self.keys.insert(jid.clone(), key) {
            self.ordered.remove(&(old, jid.clone()));
        }
        self.ordered.insert((key, jid));
    }

    pub fn remove(&mut self, jid: &JobId) -> bool {
        match self.keys.remove(jid) {
            Some(old) => self.ordered.remove(&(old, jid.clone())),
            None => false,
        }
    }

    pub fn contains(&self, jid: &JobId) -> bool {
        self.keys.contains_key(jid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Jids in pop order.
    pub fn iter(&self) -> impl Iterator<Item = &JobId> {
        self.ordered.iter().map(|(_, jid)| jid)
    }

    /// Remove and return the next jid in pop order.
    pub fn pop_first(&mut self) -> Option<JobId> {
        let jid = self.iter().next()?.clone();
        self.remove(&jid);
        Some(jid)
    }
}

/// Slice a listing the way the store's range primitive does: a count of 0
/// means everything from `offset` on.
pub fn page<T>(items: impl Iterator<Item = T>, offset: usize, count: usize) -> Vec<T> {
    let skipped = items.skip(offset);
    if count == 0 {
        skipped.collect()
    } else {
        skipped.take(count).collect()
    }
}

#[cfg(test)]
#[path = "scored_tests.rs"]
mod tests;
