// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job-centric operations: completion, failure, retries, leases, tracking,
//! dependencies, and cancellation.

use crate::scored::page;
use crate::state::KernelState;
use qd_core::{
    Channel, Failure, Group, HistoryEntry, JobId, JobSnapshot, JobState, KernelError,
    KernelResult, LogEvent, Notification, QueueName, Timestamp, WorkerName,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// Requeue target of `job.completeAndRequeue`.
#[derive(Debug, Clone, Default)]
pub struct CompleteNext {
    pub queue: QueueName,
    pub delay: f64,
    pub depends: Vec<JobId>,
}

/// `jobs.tracked` result. `expired` is retained for wire compatibility and
/// is always empty under current invariants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedReport {
    pub jobs: Vec<JobSnapshot>,
    pub expired: Vec<JobId>,
}

impl KernelState {
    pub fn job_get(&self, now: Timestamp, jid: &JobId) -> Option<JobSnapshot> {
        self.jobs.get(jid).map(|job| self.snapshot_of(job, now))
    }

    /// Missing jids are skipped, not errors.
    pub fn job_get_multi(&self, now: Timestamp, jids: &[JobId]) -> Vec<JobSnapshot> {
        jids.iter().filter_map(|jid| self.job_get(now, jid)).collect()
    }

    /// Newest-completed-first page of the completed window.
    pub fn jobs_completed(&self, offset: usize, count: usize) -> Vec<JobId> {
        page(self.completed.iter_desc().map(|(jid, _)| jid.clone()), offset, count)
    }

    /// Guard shared by complete, fail, retry, and heartbeat: the job must be
    /// running under this worker.
    fn lease_guard(&self, jid: &JobId, worker: &WorkerName) -> KernelResult<()> {
        let job = self.job(jid)?;
        if job.state != JobState::Running {
            return Err(KernelError::JobNotRunning { jid: jid.clone(), state: job.state });
        }
        match &job.worker {
            Some(owner) if owner == worker => Ok(()),
            Some(owner) => {
                Err(KernelError::AnotherWorker { jid: jid.clone(), worker: owner.clone() })
            }
            None => Err(KernelError::JobNotRunning { jid: jid.clone(), state: job.state }),
        }
    }

    /// Complete a running job, either terminally or into a next queue.
    /// Returns the resulting state name.
    pub fn complete(
        &mut self,
        now: Timestamp,
        jid: &JobId,
        worker: &WorkerName,
        queue_name: &QueueName,
        data: &str,
        next: Option<CompleteNext>,
    ) -> KernelResult<String> {
        self.lease_guard(jid, worker)?;
        {
            let job = self.job(jid)?;
            match &job.queue {
                Some(queue) if queue == queue_name => {}
                Some(queue) => {
                    return Err(KernelError::AnotherQueue { jid: jid.clone(), queue: queue.clone() })
                }
                None => {
                    return Err(KernelError::AnotherQueue {
                        jid: jid.clone(),
                        queue: QueueName::new(""),
                    })
                }
            }
        }

        let history_cap = self.config.max_job_history();
        self.detach_from_queue(jid);
        self.end_lease(worker, jid);
        self.touch_worker(worker, now);
        let (throttles, dependents, tracked) = {
            let job = self.job_mut(jid)?;
            job.data = data.to_string();
            job.worker = None;
            job.expires = None;
            job.failure = None;
            job.log_history(HistoryEntry::done(now), history_cap);
            (job.throttles.clone(), job.dependents.clone(), job.tracked)
        };
        self.release_throttles(now, jid, &throttles);

        match next {
            None => {
                {
                    let job = self.job_mut(jid)?;
                    job.state = JobState::Complete;
                    job.queue = None;
                    job.dependents.clear();
                }
                self.completed.insert(jid.clone(), now);
                for dependent in dependents {
                    let now_unblocked = match self.jobs.get_mut(&dependent) {
                        Some(dep) => {
                            dep.dependencies.remove(jid);
                            dep.dependencies.is_empty()
                        }
                        None => false,
                    };
                    if now_unblocked {
                        self.promote_unblocked(now, &dependent);
                    }
                }
                if tracked {
                    self.emit(Notification::jid(Channel::Completed, jid));
                }
                self.emit(Notification::log(&LogEvent::Completed {
                    jid: jid.clone(),
                    queue: queue_name.clone(),
                }));
                self.prune_completed(now);
                debug!(jid = %jid, queue = %queue_name, "completed");
                Ok("complete".to_string())
            }
            Some(next) => {
                let implicit = next.queue.throttle_id();
                {
                    let job = self.job_mut(jid)?;
                    job.queue = Some(next.queue.clone());
                    job.throttles.retain(|id| !id.is_queue_throttle() || *id == implicit);
                    if !job.throttles.contains(&implicit) {
                        job.throttles.push(implicit);
                    }
                    job.log_history(HistoryEntry::put(now, &next.queue), history_cap);
                }
                // Dependencies named at completion time, resolved like put.
                let mut unresolved = Vec::new();
                for dep in &next.depends {
                    if dep == jid {
                        continue;
                    }
                    if let Some(dep_job) = self.jobs.get_mut(dep) {
                        if dep_job.state != JobState::Complete {
                            dep_job.dependents.insert(jid.clone());
                            unresolved.push(dep.clone());
                        }
                    }
                }
                let seq = self.next_seq();
                let state = {
                    let job = self.job_mut(jid)?;
                    job.dependencies = unresolved.iter().cloned().collect();
                    if !unresolved.is_empty() {
                        job.state = JobState::Depends;
                        job.scheduled_at = (next.delay > 0.0).then_some(now + next.delay);
                    } else if next.delay > 0.0 {
                        job.state = JobState::Scheduled;
                    } else {
                        job.state = JobState::Waiting;
                    }
                    job.state
                };
                let priority = self.job(jid)?.priority;
                let target = self.queue_entry(&next.queue);
                match state {
                    JobState::Depends => {
                        target.depends.insert(jid.clone());
                    }
                    JobState::Scheduled => {
                        target.scheduled.insert(jid.clone(), now + next.delay);
                    }
                    _ => target.work.push(jid.clone(), priority, now, seq),
                }
                self.emit(Notification::log(&LogEvent::Advanced {
                    jid: jid.clone(),
                    queue: queue_name.clone(),
                    to: next.queue.clone(),
                }));
                debug!(jid = %jid, from = %queue_name, to = %next.queue, "advanced");
                Ok(state.to_string())
            }
        }
    }

    /// Fail a running job into a failure group.
    pub fn fail(
        &mut self,
        now: Timestamp,
        jid: &JobId,
        worker: &WorkerName,
        group: &Group,
        message: &str,
        data: Option<&str>,
    ) -> KernelResult<JobId> {
        self.lease_guard(jid, worker)?;
        self.detach_from_queue(jid);
        self.end_lease(worker, jid);
        self.touch_worker(worker, now);
        if let Some(data) = data {
            self.job_mut(jid)?.data = data.to_string();
        }
        self.fail_job(now, jid, worker, group, message);
        Ok(jid.clone())
    }

    /// Shared failure transition: throttle release, failure metadata,
    /// history, group index, and chatter. The lease is already torn down.
    pub(crate) fn fail_job(
        &mut self,
        now: Timestamp,
        jid: &JobId,
        worker: &WorkerName,
        group: &Group,
        message: &str,
    ) {
        let history_cap = self.config.max_job_history();
        let Some(job) = self.jobs.get(jid) else { return };
        let throttles = job.throttles.clone();
        self.release_throttles(now, jid, &throttles);
        let tracked = {
            let Some(job) = self.jobs.get_mut(jid) else { return };
            job.state = JobState::Failed;
            job.worker = None;
            job.expires = None;
            job.failure = Some(Failure {
                group: group.clone(),
                message: message.to_string(),
                when: now,
                worker: worker.clone(),
            });
            job.log_history(HistoryEntry::failed(now, group, worker), history_cap);
            job.tracked
        };
        self.push_failure(group, jid);
        self.emit(Notification::log(&LogEvent::Failed {
            jid: jid.clone(),
            group: group.clone(),
            message: message.to_string(),
            worker: worker.clone(),
        }));
        if tracked {
            self.emit(Notification::jid(Channel::Failed, jid));
        }
        debug!(jid = %jid, group = %group, "failed");
    }

    /// The worker declares it could not finish the job. Consumes one
    /// attempt; exhaustion fails the job, otherwise it returns to its queue
    /// (optionally delayed). Returns the remaining attempt count.
    pub fn retry(
        &mut self,
        now: Timestamp,
        jid: &JobId,
        queue_name: &QueueName,
        worker: &WorkerName,
        delay: f64,
        failure: Option<(Group, String)>,
    ) -> KernelResult<i64> {
        self.lease_guard(jid, worker)?;
        {
            let job = self.job(jid)?;
            if job.queue.as_ref() != Some(queue_name) {
                let queue = job.queue.clone().unwrap_or_else(|| QueueName::new(""));
                return Err(KernelError::AnotherQueue { jid: jid.clone(), queue });
            }
        }
        self.detach_from_queue(jid);
        self.end_lease(worker, jid);
        self.touch_worker(worker, now);
        let throttles = self.job(jid)?.throttles.clone();
        self.release_throttles(now, jid, &throttles);

        let remaining = {
            let job = self.job_mut(jid)?;
            job.remaining -= 1;
            job.worker = None;
            job.expires = None;
            job.remaining
        };
        if remaining < 0 {
            let (group, message) = failure.unwrap_or_else(|| {
                (
                    queue_name.retry_failure_group(),
                    format!("Job exhausted retries in queue \"{queue_name}\""),
                )
            });
            self.fail_job(now, jid, worker, &group, &message);
        } else {
            if let Some((group, message)) = failure {
                self.job_mut(jid)?.failure = Some(Failure {
                    group,
                    message,
                    when: now,
                    worker: worker.clone(),
                });
            }
            let seq = self.next_seq();
            let (priority, state) = {
                let job = self.job_mut(jid)?;
                job.state = if delay > 0.0 { JobState::Scheduled } else { JobState::Waiting };
                (job.priority, job.state)
            };
            let queue = self.queue_entry(queue_name);
            if state == JobState::Scheduled {
                queue.scheduled.insert(jid.clone(), now + delay);
            } else {
                queue.work.push(jid.clone(), priority, now, seq);
            }
        }
        Ok(remaining)
    }

    /// Extend a running job's lease. Returns the new expiry.
    pub fn heartbeat(
        &mut self,
        now: Timestamp,
        jid: &JobId,
        worker: &WorkerName,
        data: Option<&str>,
    ) -> KernelResult<Timestamp> {
        self.lease_guard(jid, worker)?;
        let expires = now + self.config.heartbeat();
        let queue_name = {
            let job = self.job_mut(jid)?;
            if let Some(data) = data {
                job.data = data.to_string();
            }
            job.expires = Some(expires);
            job.queue.clone()
        };
        if let Some(queue_name) = queue_name {
            self.queue_entry(&queue_name).locks.insert(jid.clone(), expires);
        }
        self.touch_worker(worker, now);
        if let Some(state) = self.workers.get_mut(worker) {
            state.jobs.insert(jid.clone(), expires);
        }
        Ok(expires)
    }

    /// Forcibly end leases: the jobs lose their workers and throttles and
    /// jump to the head of their queues as stalled.
    pub fn timeout(&mut self, now: Timestamp, jids: &[JobId]) -> KernelResult<()> {
        for jid in jids {
            let job = self.job(jid)?;
            if job.state != JobState::Running {
                return Err(KernelError::JobNotRunning { jid: jid.clone(), state: job.state });
            }
        }
        let history_cap = self.config.max_job_history();
        for jid in jids {
            let (old_worker, throttles, queue_name) = {
                let job = self.job(jid)?;
                (job.worker.clone(), job.throttles.clone(), job.queue.clone())
            };
            self.detach_from_queue(jid);
            if let Some(old_worker) = &old_worker {
                self.end_lease(old_worker, jid);
            }
            self.release_throttles(now, jid, &throttles);
            {
                let job = self.job_mut(jid)?;
                job.state = JobState::Stalled;
                job.worker = None;
                job.expires = None;
                job.log_history(HistoryEntry::timed_out(now), history_cap);
            }
            let seq = self.next_seq();
            if let Some(queue_name) = queue_name {
                self.queue_entry(&queue_name).work.push_front(jid.clone(), seq);
            }
            if let Some(old_worker) = old_worker {
                let lost = LogEvent::LockLost { jid: jid.clone(), worker: old_worker.clone() };
                self.emit(Notification::worker(&old_worker, &lost));
                self.emit(Notification::log(&lost));
            }
        }
        Ok(())
    }

    /// Cancel jobs outright. Refuses when a cancelled job still has a
    /// dependent outside the cancel set; missing jids are ignored.
    pub fn cancel(&mut self, now: Timestamp, jids: &[JobId]) -> KernelResult<()> {
        let set: HashSet<&JobId> = jids.iter().collect();
        for jid in jids {
            if let Some(job) = self.jobs.get(jid) {
                for dependent in &job.dependents {
                    if !set.contains(dependent) {
                        return Err(KernelError::IsADependency {
                            jid: jid.clone(),
                            dependent: dependent.clone(),
                        });
                    }
                }
            }
        }
        for jid in jids {
            let Some(job) = self.jobs.get(jid) else { continue };
            let queue = job.queue.clone().unwrap_or_else(|| QueueName::new(""));
            let worker = job.worker.clone();
            let tracked = job.tracked;
            let canceled = LogEvent::Canceled {
                jid: jid.clone(),
                queue,
                worker: worker.clone().unwrap_or_else(|| WorkerName::new("")),
            };
            self.emit(Notification::log(&canceled));
            if let Some(worker) = &worker {
                self.emit(Notification::worker(worker, &canceled));
            }
            if tracked {
                self.emit(Notification::jid(Channel::Canceled, jid));
            }
            self.delete_job(now, jid);
            debug!(jid = %jid, "canceled");
        }
        Ok(())
    }

    /// Append an arbitrary history entry.
    pub fn job_log(
        &mut self,
        now: Timestamp,
        jid: &JobId,
        what: &str,
        data: Map<String, Value>,
    ) -> KernelResult<()> {
        let history_cap = self.config.max_job_history();
        let job = self.job_mut(jid)?;
        job.log_history(HistoryEntry::logged(what, now, data), history_cap);
        Ok(())
    }

    /// Reprioritize; a waiting job is re-ranked immediately.
    pub fn set_priority(&mut self, now: Timestamp, jid: &JobId, priority: i64) -> KernelResult<()> {
        let queue_name = {
            let job = self.job_mut(jid)?;
            job.priority = priority;
            job.queue.clone()
        };
        let seq = self.next_seq();
        if let Some(queue_name) = queue_name {
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                if queue.work.contains(jid) {
                    queue.work.push(jid.clone(), priority, now, seq);
                }
            }
        }
        Ok(())
    }

    pub fn track(&mut self, _now: Timestamp, jid: &JobId) -> KernelResult<()> {
        self.job_mut(jid)?.tracked = true;
        self.tracked.insert(jid.clone());
        self.emit(Notification::jid(Channel::Track, jid));
        Ok(())
    }

    pub fn untrack(&mut self, _now: Timestamp, jid: &JobId) -> KernelResult<()> {
        if let Some(job) = self.jobs.get_mut(jid) {
            job.tracked = false;
        }
        self.tracked.shift_remove(jid);
        self.emit(Notification::jid(Channel::Untrack, jid));
        Ok(())
    }

    pub fn tracked_report(&self, now: Timestamp) -> TrackedReport {
        TrackedReport {
            jobs: self
                .tracked
                .iter()
                .filter_map(|jid| self.job_get(now, jid))
                .collect(),
            expired: Vec::new(),
        }
    }

    /// Add dependencies to a job already in the depends state.
    pub fn add_dependency(&mut self, _now: Timestamp, jid: &JobId, on: &[JobId]) -> KernelResult<()> {
        self.depends_guard(jid)?;
        for dep in on {
            if dep == jid {
                continue;
            }
            let eligible = match self.jobs.get_mut(dep) {
                Some(dep_job) if dep_job.state != JobState::Complete => {
                    dep_job.dependents.insert(jid.clone());
                    true
                }
                _ => false,
            };
            if eligible {
                self.job_mut(jid)?.dependencies.insert(dep.clone());
            }
        }
        Ok(())
    }

    /// Remove dependencies; the job is released once the last one goes.
    pub fn remove_dependency(
        &mut self,
        now: Timestamp,
        jid: &JobId,
        off: &[JobId],
    ) -> KernelResult<()> {
        self.depends_guard(jid)?;
        for dep in off {
            self.job_mut(jid)?.dependencies.remove(dep);
            if let Some(dep_job) = self.jobs.get_mut(dep) {
                dep_job.dependents.remove(jid);
            }
        }
        if self.job(jid)?.dependencies.is_empty() {
            self.promote_unblocked(now, jid);
        }
        Ok(())
    }

    fn depends_guard(&self, jid: &JobId) -> KernelResult<()> {
        match self.jobs.get(jid) {
            Some(job) if job.state == JobState::Depends => Ok(()),
            _ => Err(KernelError::NotInDependsState { jid: jid.clone() }),
        }
    }

    /// A job's last dependency resolved: leave depends for scheduled (when a
    /// delay is still pending) or waiting.
    pub(crate) fn promote_unblocked(&mut self, now: Timestamp, jid: &JobId) {
        let seq = self.next_seq();
        let (queue_name, priority, ready) = match self.jobs.get_mut(jid) {
            Some(job) => {
                let Some(queue_name) = job.queue.clone() else { return };
                let ready = job.scheduled_at.filter(|ready| *ready > now);
                if ready.is_some() {
                    job.state = JobState::Scheduled;
                } else {
                    job.state = JobState::Waiting;
                    job.scheduled_at = None;
                }
                (queue_name, job.priority, ready)
            }
            None => return,
        };
        let queue = self.queue_entry(&queue_name);
        queue.depends.shift_remove(jid);
        match ready {
            Some(ready) => queue.scheduled.insert(jid.clone(), ready),
            None => queue.work.push(jid.clone(), priority, now, seq),
        }
    }

    /// Expire completed jobs out of the retention window: first by age
    /// (`jobs-history`), then by count (`jobs-history-count`), oldest first.
    fn prune_completed(&mut self, now: Timestamp) {
        let cutoff = now - self.config.jobs_history();
        for jid in self.completed.members_le(cutoff) {
            self.delete_job(now, &jid);
        }
        let cap = self.config.jobs_history_count();
        while self.completed.len() > cap {
            let Some(oldest) = self.completed.iter().next().map(|(jid, _)| jid.clone()) else {
                break;
            };
            self.delete_job(now, &oldest);
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
