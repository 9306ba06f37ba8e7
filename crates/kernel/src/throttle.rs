// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Throttle engine: named concurrency tokens with pending FIFOs.
//!
//! A maximum of 0 (including the unset default) imposes no limit — the
//! implicit per-queue throttle relies on this. Acquisition is all-or-nothing
//! across a job's throttle list and idempotent per throttle, so a stalled
//! job being handed to a new worker re-acquires the locks it already holds.

use crate::state::{KernelState, ThrottleRecord};
use qd_core::{JobId, JobState, QueueName, ThrottleId, Timestamp};
use serde::Serialize;
use tracing::debug;

/// TTL sentinel: throttle exists without an expiry.
pub const TTL_NONE: f64 = -1.0;
/// TTL sentinel: throttle does not exist.
pub const TTL_MISSING: f64 = -2.0;

/// Wire view returned by `throttle.get`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrottleSnapshot {
    pub id: ThrottleId,
    pub maximum: i64,
    pub ttl: f64,
}

impl KernelState {
    /// Effective maximum at `now`; 0 (no limit) once the record has lapsed.
    fn throttle_maximum(&self, now: Timestamp, id: &ThrottleId) -> i64 {
        self.throttles
            .get(id)
            .and_then(|state| state.record)
            .filter(|record| record.expires_at.is_none_or(|at| at > now))
            .map(|record| record.maximum)
            .unwrap_or(0)
    }

    /// Try to take a token from every throttle in order. Either all are held
    /// on return, or none are and the denying throttle id comes back.
    pub(crate) fn acquire_throttles(
        &mut self,
        now: Timestamp,
        jid: &JobId,
        ids: &[ThrottleId],
    ) -> Result<(), ThrottleId> {
        let mut acquired: Vec<ThrottleId> = Vec::new();
        for id in ids {
            let maximum = self.throttle_maximum(now, id);
            let state = self.throttles.entry(id.clone()).or_default();
            if state.locks.contains(jid) {
                continue;
            }
            if maximum <= 0 || (state.locks.len() as i64) < maximum {
                state.locks.insert(jid.clone());
                acquired.push(id.clone());
            } else {
                for held in &acquired {
                    if let Some(state) = self.throttles.get_mut(held) {
                        state.locks.shift_remove(jid);
                    }
                }
                debug!(jid = %jid, throttle = %id, "throttle at capacity");
                return Err(id.clone());
            }
        }
        Ok(())
    }

    /// Release a job from every throttle it cites. Freed locks pull pending
    /// jobs back into their queue's waiting order.
    pub(crate) fn release_throttles(&mut self, now: Timestamp, jid: &JobId, ids: &[ThrottleId]) {
        for id in ids {
            self.release_one(now, id, jid);
        }
    }

    fn release_one(&mut self, now: Timestamp, id: &ThrottleId, jid: &JobId) {
        let Some(state) = self.throttles.get_mut(id) else { return };
        if state.locks.shift_remove(jid) {
            self.activate_pending(now, id);
        } else {
            state.pending.shift_remove(jid);
        }
    }

    /// Move pending heads back to waiting, up to the free capacity.
    pub(crate) fn activate_pending(&mut self, now: Timestamp, id: &ThrottleId) {
        let maximum = self.throttle_maximum(now, id);
        let Some(state) = self.throttles.get_mut(id) else { return };
        let available = if maximum <= 0 {
            state.pending.len()
        } else {
            (maximum - state.locks.len() as i64).max(0) as usize
        };
        let mut activated: Vec<JobId> = Vec::new();
        for _ in 0..available {
            match state.pending.shift_remove_index(0) {
                Some(next) => activated.push(next),
                None => break,
            }
        }
        for jid in activated {
            self.requeue_pending(now, &jid);
        }
    }

    /// A pending job goes back into its queue's waiting order at `now`.
    fn requeue_pending(&mut self, now: Timestamp, jid: &JobId) {
        let seq = self.next_seq();
        let Some(job) = self.jobs.get_mut(jid) else { return };
        let Some(queue_name) = job.queue.clone() else { return };
        job.state = JobState::Waiting;
        let priority = job.priority;
        let queue = self.queue_entry(&queue_name);
        queue.throttled.shift_remove(jid);
        queue.work.push(jid.clone(), priority, now, seq);
    }

    // -- API operations --

    pub fn throttle_set(&mut self, now: Timestamp, id: &ThrottleId, maximum: i64, ttl: f64) {
        let expires_at = (ttl > 0.0).then_some(now + ttl);
        let state = self.throttles.entry(id.clone()).or_default();
        state.record = Some(ThrottleRecord { maximum, expires_at });
        self.activate_pending(now, id);
    }

    pub fn throttle_get(&self, now: Timestamp, id: &ThrottleId) -> ThrottleSnapshot {
        let ttl = self.throttle_ttl(now, id);
        let maximum = if ttl == TTL_MISSING { 0 } else { self.throttle_maximum(now, id) };
        ThrottleSnapshot { id: id.clone(), maximum, ttl }
    }

    /// Remaining TTL in seconds; -1 for no expiry, -2 for no throttle.
    pub fn throttle_ttl(&self, now: Timestamp, id: &ThrottleId) -> f64 {
        match self.throttles.get(id).and_then(|state| state.record) {
            Some(ThrottleRecord { expires_at: None, .. }) => TTL_NONE,
            Some(ThrottleRecord { expires_at: Some(at), .. }) if at > now => at - now,
            Some(_) => TTL_MISSING,
            None => TTL_MISSING,
        }
    }

    pub fn throttle_delete(&mut self, _now: Timestamp, id: &ThrottleId) {
        if let Some(state) = self.throttles.get_mut(id) {
            state.record = None;
            if state.locks.is_empty() && state.pending.is_empty() {
                self.throttles.remove(id);
            }
        }
    }

    /// Cleanup API: drop the listed jids from both locks and pending,
    /// regardless of worker identity.
    pub fn throttle_release_jids(&mut self, now: Timestamp, id: &ThrottleId, jids: &[JobId]) {
        for jid in jids {
            self.release_one(now, id, jid);
        }
    }

    pub fn throttle_locks(&self, id: &ThrottleId) -> Vec<JobId> {
        self.throttles
            .get(id)
            .map(|state| state.locks.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn throttle_pending(&self, id: &ThrottleId) -> Vec<JobId> {
        self.throttles
            .get(id)
            .map(|state| state.pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queue_throttle_set(&mut self, now: Timestamp, queue: &QueueName, maximum: i64) {
        self.throttle_set(now, &queue.throttle_id(), maximum, 0.0);
    }

    pub fn queue_throttle_get(&self, now: Timestamp, queue: &QueueName) -> ThrottleSnapshot {
        self.throttle_get(now, &queue.throttle_id())
    }
}

#[cfg(test)]
#[path = "throttle_tests.rs"]
mod tests;
