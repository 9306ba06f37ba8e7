// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tag index: inverted tag → jobs mapping plus a popularity ranking.

use crate::scored::{page, ScoredSet};
use crate::state::KernelState;
use qd_core::{JobId, KernelResult, Tag, Timestamp};
use serde::Serialize;

/// Page of `jobs.tagged`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedPage {
    pub total: usize,
    pub jobs: Vec<JobId>,
}

impl KernelState {
    /// Register `jid` under `tag` at `now` and bump the ranking.
    pub(crate) fn tag_job(&mut self, now: Timestamp, jid: &JobId, tag: &Tag) {
        let index = self.tags.entry(tag.clone()).or_insert_with(ScoredSet::new);
        index.insert(jid.clone(), now);
        let population = index.len() as f64;
        self.tag_counts.insert(tag.clone(), population);
    }

    /// Drop `jid` from `tag`'s index, retiring the tag when it empties.
    pub(crate) fn untag(&mut self, jid: &JobId, tag: &Tag) {
        let Some(index) = self.tags.get_mut(tag) else { return };
        index.remove(jid);
        if index.is_empty() {
            self.tags.remove(tag);
            self.tag_counts.remove(tag);
        } else {
            let population = index.len() as f64;
            self.tag_counts.insert(tag.clone(), population);
        }
    }

    /// `job.addTag`: idempotent, variadic; returns the job's tags.
    pub fn add_tags(&mut self, now: Timestamp, jid: &JobId, tags: &[Tag]) -> KernelResult<Vec<Tag>> {
        self.job(jid)?;
        for tag in tags {
            let added = match self.jobs.get_mut(jid) {
                Some(job) => job.add_tag(tag),
                None => false,
            };
            if added {
                self.tag_job(now, jid, tag);
            }
        }
        Ok(self.job(jid)?.tags.clone())
    }

    /// `job.removeTag`: absent tags are ignored; returns the job's tags.
    pub fn remove_tags(&mut self, jid: &JobId, tags: &[Tag]) -> KernelResult<Vec<Tag>> {
        self.job(jid)?;
        for tag in tags {
            let removed = match self.jobs.get_mut(jid) {
                Some(job) => job.remove_tag(tag),
                None => false,
            };
            if removed {
                self.untag(jid, tag);
            }
        }
        Ok(self.job(jid)?.tags.clone())
    }

    /// Jids carrying `tag`, oldest-tagged first.
    pub fn jobs_tagged(&self, tag: &Tag, offset: usize, count: usize) -> TaggedPage {
        match self.tags.get(tag) {
            None => TaggedPage { total: 0, jobs: Vec::new() },
            Some(index) => TaggedPage {
                total: index.len(),
                jobs: page(index.iter().map(|(jid, _)| jid.clone()), offset, count),
            },
        }
    }

    /// Tags by popularity, descending, skipping tags on fewer than two jobs.
    pub fn tags_top(&self, offset: usize, count: usize) -> Vec<Tag> {
        page(
            self.tag_counts
                .iter_desc()
                .filter(|(_, population)| *population >= 2.0)
                .map(|(tag, _)| tag.clone()),
            offset,
            count,
        )
    }
}

#[cfg(test)]
#[path = "tag_tests.rs"]
mod tests;
