// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker registry: lease bookkeeping and activity-based expiry.

use crate::state::KernelState;
use qd_core::{JobId, Timestamp, WorkerName};
use serde::Serialize;

/// `worker.jobs` result: live leases and the ones that expired past grace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerJobsReport {
    pub jobs: Vec<JobId>,
    pub stalled: Vec<JobId>,
}

/// One row of `workers.counts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerCounts {
    pub name: WorkerName,
    pub jobs: usize,
    pub stalled: usize,
}

impl KernelState {
    /// Partition a worker's leases by whether they expired past grace.
    pub fn worker_jobs(&self, now: Timestamp, worker: &WorkerName) -> WorkerJobsReport {
        let cutoff = now - self.grace();
        match self.workers.get(worker) {
            None => WorkerJobsReport { jobs: Vec::new(), stalled: Vec::new() },
            Some(state) => WorkerJobsReport {
                jobs: state
                    .jobs
                    .iter()
                    .filter(|(_, expires)| *expires > cutoff)
                    .map(|(jid, _)| jid.clone())
                    .collect(),
                stalled: state.jobs.members_le(cutoff),
            },
        }
    }

    /// Known workers, most recently active first. Workers silent for
    /// `max-worker-age` are dropped on the way.
    pub fn workers_counts(&mut self, now: Timestamp) -> Vec<WorkerCounts> {
        let horizon = now - self.config.max_worker_age();
        for name in self.worker_activity.members_le(horizon) {
            self.workers.remove(&name);
            self.worker_activity.remove(&name);
        }
        let names: Vec<WorkerName> =
            self.worker_activity.iter_desc().map(|(name, _)| name.clone()).collect();
        names
            .into_iter()
            .map(|name| {
                let report = self.worker_jobs(now, &name);
                WorkerCounts { name, jobs: report.jobs.len(), stalled: report.stalled.len() }
            })
            .collect()
    }

    /// Drop workers from the registry immediately.
    pub fn worker_forget(&mut self, workers: &[WorkerName]) {
        for worker in workers {
            self.workers.remove(worker);
            self.worker_activity.remove(worker);
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
