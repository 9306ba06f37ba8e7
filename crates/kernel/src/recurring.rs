// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recurring engine: templates that expand into child jobs at pop time.

use crate::state::KernelState;
use qd_core::{
    HistoryEntry, Job, JobId, KernelError, KernelResult, QueueName, RecurringJob,
    RecurringSnapshot, Tag, ThrottleId, Timestamp,
};
use tracing::debug;

/// Optional attributes of `queue.recurAtInterval`.
#[derive(Debug, Clone, Default)]
pub struct RecurOptions {
    pub tags: Option<Vec<Tag>>,
    pub priority: Option<i64>,
    pub retries: Option<i64>,
    pub backlog: Option<i64>,
    pub throttles: Option<Vec<ThrottleId>>,
}

/// One typed field update for `recurringJob.update`.
#[derive(Debug, Clone, PartialEq)]
pub enum RecurringUpdate {
    Priority(i64),
    Interval(f64),
    Retries(i64),
    Backlog(i64),
    Data(String),
    Klass(String),
    Queue(QueueName),
    Throttles(Vec<ThrottleId>),
}

impl KernelState {
    /// Create or refresh a recurring template. Refreshing keeps the spawn
    /// counter but re-bases the next spawn to `now + offset`.
    #[allow(clippy::too_many_arguments)]
    pub fn recur_at_interval(
        &mut self,
        now: Timestamp,
        queue_name: &QueueName,
        jid: &JobId,
        klass: &str,
        data: &str,
        interval: f64,
        offset: f64,
        options: RecurOptions,
    ) -> KernelResult<JobId> {
        if interval <= 0.0 {
            return Err(KernelError::invalid(
                "queue.recurAtInterval",
                "interval",
                format!("must be positive: {interval}"),
            ));
        }
        let implicit = queue_name.throttle_id();
        match self.recurring.get_mut(jid) {
            Some(template) => {
                let old_queue = template.queue.clone();
                template.klass = klass.to_string();
                template.data = data.to_string();
                template.interval = interval;
                if let Some(priority) = options.priority {
                    template.priority = priority;
                }
                if let Some(retries) = options.retries {
                    template.retries = retries;
                }
                if let Some(backlog) = options.backlog {
                    template.backlog = backlog;
                }
                if let Some(tags) = options.tags {
                    template.tags = tags;
                }
                if let Some(mut throttles) = options.throttles {
                    if !throttles.contains(&implicit) {
                        throttles.push(implicit.clone());
                    }
                    template.throttles = throttles;
                }
                if old_queue != *queue_name {
                    template.queue = queue_name.clone();
                    let old_implicit = old_queue.throttle_id();
                    template.throttles.retain(|id| *id != old_implicit);
                    if !template.throttles.contains(&implicit) {
                        template.throttles.push(implicit);
                    }
                    if let Some(queue) = self.queues.get_mut(&old_queue) {
                        queue.recurring.remove(jid);
                    }
                }
            }
            None => {
                let mut throttles = options.throttles.unwrap_or_default();
                if !throttles.contains(&implicit) {
                    throttles.push(implicit);
                }
                self.recurring.insert(
                    jid.clone(),
                    RecurringJob {
                        jid: jid.clone(),
                        queue: queue_name.clone(),
                        klass: klass.to_string(),
                        data: data.to_string(),
                        interval,
                        retries: options.retries.unwrap_or(0),
                        priority: options.priority.unwrap_or(0),
                        backlog: options.backlog.unwrap_or(0),
                        tags: options.tags.unwrap_or_default(),
                        throttles,
                        count: 0,
                    },
                );
            }
        }
        self.queue_entry(queue_name).recurring.insert(jid.clone(), now + offset);
        Ok(jid.clone())
    }

    /// Spawn children for every template in `queue_name` that is due at
    /// `now`, bounded by the caller's remaining demand.
    pub(crate) fn check_recurring(&mut self, now: Timestamp, queue_name: &QueueName, budget: usize) {
        let mut remaining = budget;
        let due: Vec<(JobId, f64)> = match self.queues.get(queue_name) {
            Some(queue) => queue
                .recurring
                .iter()
                .take_while(|(_, score)| *score <= now)
                .map(|(jid, score)| (jid.clone(), score))
                .collect(),
            None => return,
        };
        for (jid, mut score) in due {
            let Some(template) = self.recurring.get(&jid) else { continue };
            let interval = template.interval;
            let backlog = template.backlog;
            if backlog > 0 {
                let missed = (now - score) / interval;
                if missed > backlog as f64 {
                    score += (missed - backlog as f64) * interval;
                }
            }
            while score <= now && remaining > 0 {
                self.spawn_child(&jid, score);
                score += interval;
                remaining -= 1;
            }
            self.queue_entry(queue_name).recurring.insert(jid, score);
        }
    }

    /// Materialize one child at its scheduled moment.
    fn spawn_child(&mut self, parent: &JobId, moment: Timestamp) {
        let history_cap = self.config.max_job_history();
        let Some(template) = self.recurring.get_mut(parent) else { return };
        template.count += 1;
        let child_jid = JobId::spawned(parent, template.count);
        let queue_name = template.queue.clone();
        let mut child = Job::new(child_jid.clone(), template.klass.clone(), template.data.clone());
        child.queue = Some(queue_name.clone());
        child.priority = template.priority;
        child.tags = template.tags.clone();
        child.throttles = template.throttles.clone();
        child.retries = template.retries;
        child.remaining = template.retries;
        child.spawned_from_jid = Some(parent.clone());
        child.log_history(HistoryEntry::put(moment, &queue_name), history_cap);
        let priority = child.priority;
        let tags = child.tags.clone();
        debug!(parent = %parent, child = %child_jid, queue = %queue_name, "spawned recurring child");
        self.jobs.insert(child_jid.clone(), child);
        for tag in &tags {
            self.tag_job(moment, &child_jid, tag);
        }
        let seq = self.next_seq();
        self.queue_entry(&queue_name).work.push(child_jid, priority, moment, seq);
    }

    pub fn recurring_get(&self, jid: &JobId) -> Option<RecurringSnapshot> {
        self.recurring.get(jid).map(RecurringJob::snapshot)
    }

    /// Apply typed field updates to a template.
    pub fn recurring_update(
        &mut self,
        _now: Timestamp,
        jid: &JobId,
        updates: Vec<RecurringUpdate>,
    ) -> KernelResult<JobId> {
        if !self.recurring.contains_key(jid) {
            return Err(KernelError::RecurringJobDoesNotExist { jid: jid.clone() });
        }
        for update in updates {
            self.apply_recurring_update(jid, update);
        }
        Ok(jid.clone())
    }

    fn apply_recurring_update(&mut self, jid: &JobId, update: RecurringUpdate) {
        let Some(template) = self.recurring.get_mut(jid) else { return };
        match update {
            RecurringUpdate::Priority(priority) => template.priority = priority,
            RecurringUpdate::Retries(retries) => template.retries = retries,
            RecurringUpdate::Backlog(backlog) => template.backlog = backlog,
            RecurringUpdate::Data(data) => template.data = data,
            RecurringUpdate::Klass(klass) => template.klass = klass,
            RecurringUpdate::Interval(interval) => {
                // Re-base the next spawn as if the new cadence had applied
                // since the last one.
                let queue_name = template.queue.clone();
                let delta = interval - template.interval;
                template.interval = interval;
                if let Some(queue) = self.queues.get_mut(&queue_name) {
                    if let Some(score) = queue.recurring.score(jid) {
                        queue.recurring.insert(jid.clone(), score + delta);
                    }
                }
            }
            RecurringUpdate::Throttles(throttles) => template.throttles = throttles,
            RecurringUpdate::Queue(new_queue) => {
                let old_queue = template.queue.clone();
                if old_queue == new_queue {
                    return;
                }
                template.queue = new_queue.clone();
                let old_implicit = old_queue.throttle_id();
                let new_implicit = new_queue.throttle_id();
                template.throttles.retain(|id| *id != old_implicit);
                if !template.throttles.contains(&new_implicit) {
                    template.throttles.push(new_implicit);
                }
                let score = self
                    .queues
                    .get_mut(&old_queue)
                    .and_then(|queue| {
                        let score = queue.recurring.score(jid);
                        queue.recurring.remove(jid);
                        score
                    })
                    .unwrap_or(0.0);
                self.queue_entry(&new_queue).recurring.insert(jid.clone(), score);
            }
        }
    }

    /// Remove templates; spawned children are unaffected.
    pub fn recurring_cancel(&mut self, jids: &[JobId]) -> KernelResult<()> {
        for jid in jids {
            let Some(template) = self.recurring.remove(jid) else {
                return Err(KernelError::RecurringJobDoesNotExist { jid: jid.clone() });
            };
            if let Some(queue) = self.queues.get_mut(&template.queue) {
                queue.recurring.remove(jid);
            }
        }
        Ok(())
    }

    pub fn recurring_add_tags(&mut self, jid: &JobId, tags: &[Tag]) -> KernelResult<Vec<Tag>> {
        let Some(template) = self.recurring.get_mut(jid) else {
            return Err(KernelError::RecurringJobDoesNotExist { jid: jid.clone() });
        };
        for tag in tags {
            if !template.tags.contains(tag) {
                template.tags.push(tag.clone());
            }
        }
        Ok(template.tags.clone())
    }

    pub fn recurring_remove_tags(&mut self, jid: &JobId, tags: &[Tag]) -> KernelResult<Vec<Tag>> {
        let Some(template) = self.recurring.get_mut(jid) else {
            return Err(KernelError::RecurringJobDoesNotExist { jid: jid.clone() });
        };
        template.tags.retain(|tag| !tags.contains(tag));
        Ok(template.tags.clone())
    }
}

#[cfg(test)]
#[path = "recurring_tests.rs"]
mod tests;
