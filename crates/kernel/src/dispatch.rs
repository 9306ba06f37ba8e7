// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command dispatcher: the stringly-typed invocation surface.
//!
//! `(command, now, args…)` calls are parsed into a typed [`Command`] before
//! any state is touched, so malformed input can never leave partial
//! mutations behind. Deprecated command names are folded onto their
//! canonical equivalents during parsing.

use crate::failure::FailedPage;
use crate::job::{CompleteNext, TrackedReport};
use crate::patterns::PriorityPattern;
use crate::queue::{PutOptions, QueueCounts};
use crate::recurring::{RecurOptions, RecurringUpdate};
use crate::state::KernelState;
use crate::tag::TaggedPage;
use crate::throttle::ThrottleSnapshot;
use crate::worker::{WorkerCounts, WorkerJobsReport};
use qd_core::{
    Group, JobId, JobSnapshot, KernelError, KernelResult, QueueName, RecurringSnapshot, Tag,
    ThrottleId, Timestamp, WorkerName,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A parsed kernel invocation.
#[derive(Debug, Clone)]
pub enum Command {
    ConfigGet { key: Option<String> },
    ConfigGetAll,
    ConfigSet { key: String, value: Value },
    ConfigUnset { key: String },

    Put { worker: WorkerName, queue: QueueName, jid: JobId, klass: String, data: String, delay: f64, options: PutOptions },
    Requeue { worker: WorkerName, queue: QueueName, jid: JobId, klass: String, data: String, delay: f64, options: PutOptions },
    Pop { queue: QueueName, worker: WorkerName, count: usize },
    Peek { queue: QueueName, offset: usize, count: usize },
    Pause { queue: QueueName },
    Unpause { queue: QueueName },
    QueueCounts { queue: Option<QueueName> },
    QueuesCounts,
    QueueNames,
    JobsByState { state: String, queue: QueueName, offset: usize, count: usize },
    Unfail { queue: QueueName, group: Group, count: usize },
    QueueThrottleSet { queue: QueueName, maximum: i64 },
    QueueThrottleGet { queue: QueueName },

    JobGet { jid: JobId },
    JobGetMulti { jids: Vec<JobId> },
    Complete { jid: JobId, worker: WorkerName, queue: QueueName, data: String, next: Option<CompleteNext> },
    Fail { jid: JobId, worker: WorkerName, group: Group, message: String, data: Option<String> },
    Retry { jid: JobId, queue: QueueName, worker: WorkerName, delay: f64, failure: Option<(Group, String)> },
    Heartbeat { jid: JobId, worker: WorkerName, data: Option<String> },
    Timeout { jids: Vec<JobId> },
    Cancel { jids: Vec<JobId> },
    Log { jid: JobId, what: String, data: Map<String, Value> },
    SetPriority { jid: JobId, priority: i64 },
    Track { jid: JobId },
    Untrack { jid: JobId },
    AddDependency { jid: JobId, on: Vec<JobId> },
    RemoveDependency { jid: JobId, off: Vec<JobId> },
    AddTag { jid: JobId, tags: Vec<Tag> },
    RemoveTag { jid: JobId, tags: Vec<Tag> },

    JobsCompleted { offset: usize, count: usize },
    JobsTracked,
    JobsTagged { tag: Tag, offset: usize, count: usize },
    JobsFailedByGroup { group: Group, offset: usize, count: usize },
    FailureGroupsCounts,
    TagsTop { offset: usize, count: usize },

    RecurAtInterval { queue: QueueName, jid: JobId, klass: String, data: String, interval: f64, offset: f64, options: RecurOptions },
    RecurringGet { jid: JobId },
    RecurringUpdate { jid: JobId, updates: Vec<RecurringUpdate> },
    RecurringCancel { jids: Vec<JobId> },
    RecurringAddTag { jid: JobId, tags: Vec<Tag> },
    RecurringRemoveTag { jid: JobId, tags: Vec<Tag> },

    ThrottleSet { id: ThrottleId, maximum: i64, ttl: f64 },
    ThrottleGet { id: ThrottleId },
    ThrottleDelete { id: ThrottleId },
    ThrottleRelease { id: ThrottleId, jids: Vec<JobId> },
    ThrottleTtl { id: ThrottleId },
    ThrottleLocks { id: ThrottleId },
    ThrottlePending { id: ThrottleId },

    WorkerJobs { worker: WorkerName },
    WorkerForget { workers: Vec<WorkerName> },
    WorkersCounts,

    IdentifierPatternsGetAll,
    IdentifierPatternsSetAll { entries: Vec<(String, Vec<String>)> },
    PriorityPatternsGetAll,
    PriorityPatternsSetAll { entries: Vec<PriorityPattern> },
}

/// Tagged result of a kernel invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Ack,
    Number(f64),
    Int(i64),
    Count(usize),
    Text(String),
    Jid(JobId),
    Jids(Vec<JobId>),
    Job(Option<Box<JobSnapshot>>),
    Jobs(Vec<JobSnapshot>),
    Recurring(Option<Box<RecurringSnapshot>>),
    QueueCounts(Box<QueueCounts>),
    QueuesCounts(Vec<QueueCounts>),
    QueueNames(Vec<QueueName>),
    WorkerJobs(WorkerJobsReport),
    WorkersCounts(Vec<WorkerCounts>),
    Tagged(TaggedPage),
    Tags(Vec<Tag>),
    FailureCounts(BTreeMap<Group, usize>),
    Failed(FailedPage),
    Tracked(TrackedReport),
    Throttle(ThrottleSnapshot),
    Config(Option<Value>),
    ConfigAll(BTreeMap<String, Value>),
    IdentifierPatterns(BTreeMap<String, Vec<String>>),
    PriorityPatterns(Vec<PriorityPattern>),
}

impl Reply {
    /// JSON rendering, for transports and tests.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Cursor over the raw argument list with typed extraction.
struct Args<'a> {
    command: &'static str,
    values: &'a [Value],
    at: usize,
}

impl<'a> Args<'a> {
    fn new(command: &'static str, values: &'a [Value]) -> Self {
        Self { command, values, at: 0 }
    }

    fn missing(&self, arg: &'static str) -> KernelError {
        KernelError::MissingArgument { command: self.command, arg }
    }

    fn next(&mut self) -> Option<&'a Value> {
        let value = self.values.get(self.at)?;
        self.at += 1;
        Some(value)
    }

    fn has_more(&self) -> bool {
        self.at < self.values.len()
    }

    fn want_str(&mut self, arg: &'static str) -> KernelResult<String> {
        match self.next() {
            None => Err(self.missing(arg)),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(KernelError::invalid(
                self.command,
                arg,
                format!("not a string: {other}"),
            )),
        }
    }

    fn opt_str(&mut self, arg: &'static str) -> KernelResult<Option<String>> {
        if self.has_more() {
            Ok(Some(self.want_str(arg)?))
        } else {
            Ok(None)
        }
    }

    fn want_f64(&mut self, arg: &'static str) -> KernelResult<f64> {
        match self.next() {
            None => Err(self.missing(arg)),
            Some(value) => as_f64(value).ok_or_else(|| {
                KernelError::invalid(self.command, arg, format!("not a number: {value}"))
            }),
        }
    }

    fn opt_f64(&mut self, arg: &'static str) -> KernelResult<Option<f64>> {
        if self.has_more() {
            Ok(Some(self.want_f64(arg)?))
        } else {
            Ok(None)
        }
    }

    fn want_i64(&mut self, arg: &'static str) -> KernelResult<i64> {
        Ok(self.want_f64(arg)? as i64)
    }

    fn want_usize(&mut self, arg: &'static str) -> KernelResult<usize> {
        let value = self.want_f64(arg)?;
        if value < 0.0 {
            return Err(KernelError::invalid(
                self.command,
                arg,
                format!("negative: {value}"),
            ));
        }
        Ok(value as usize)
    }

    fn opt_usize(&mut self, arg: &'static str, default: usize) -> KernelResult<usize> {
        if self.has_more() {
            self.want_usize(arg)
        } else {
            Ok(default)
        }
    }

    /// Opaque payload: inline JSON value or a string of valid JSON.
    fn want_data(&mut self, arg: &'static str) -> KernelResult<String> {
        match self.next() {
            None => Err(self.missing(arg)),
            Some(value @ (Value::Object(_) | Value::Array(_))) => {
                serde_json::to_string(value).map_err(|err| {
                    KernelError::invalid(self.command, arg, format!("unserializable: {err}"))
                })
            }
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(_) => Ok(s.clone()),
                Err(err) => {
                    Err(KernelError::invalid(self.command, arg, format!("not valid JSON: {err}")))
                }
            },
            Some(other) => Err(KernelError::invalid(
                self.command,
                arg,
                format!("not a JSON payload: {other}"),
            )),
        }
    }

    /// List of strings: inline array or a string of a JSON array.
    fn want_list(&mut self, arg: &'static str) -> KernelResult<Vec<String>> {
        let invalid =
            |command, reason: String| KernelError::InvalidArgument { command, arg, reason };
        match self.next() {
            None => Err(self.missing(arg)),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(invalid(self.command, format!("not a string: {other}"))),
                })
                .collect(),
            Some(Value::String(s)) => serde_json::from_str::<Vec<String>>(s)
                .map_err(|err| invalid(self.command, format!("not a JSON list: {err}"))),
            Some(other) => Err(invalid(self.command, format!("not a list: {other}"))),
        }
    }

    /// Optional key/value payload for `job.log`.
    fn opt_map(&mut self, arg: &'static str) -> KernelResult<Map<String, Value>> {
        match self.next() {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(Value::String(s)) => serde_json::from_str::<Map<String, Value>>(s)
                .map_err(|err| {
                    KernelError::invalid(self.command, arg, format!("not a JSON object: {err}"))
                }),
            Some(other) => Err(KernelError::invalid(
                self.command,
                arg,
                format!("not an object: {other}"),
            )),
        }
    }

    fn rest_strs(&mut self, arg: &'static str) -> KernelResult<Vec<String>> {
        let mut items = Vec::new();
        while self.has_more() {
            items.push(self.want_str(arg)?);
        }
        Ok(items)
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn jids(names: Vec<String>) -> Vec<JobId> {
    names.into_iter().map(JobId::new).collect()
}

fn tags(names: Vec<String>) -> Vec<Tag> {
    names.into_iter().map(Tag::new).collect()
}

/// `queue.put` / `job.requeue` trailing options.
fn parse_put_options(args: &mut Args<'_>) -> KernelResult<PutOptions> {
    let mut options = PutOptions::default();
    while args.has_more() {
        let key = args.want_str("option")?;
        match key.as_str() {
            "priority" => options.priority = Some(args.want_i64("priority")?),
            "retries" => options.retries = Some(args.want_i64("retries")?),
            "tags" => options.tags = Some(tags(args.want_list("tags")?)),
            "depends" => options.depends = Some(jids(args.want_list("depends")?)),
            "throttles" => {
                options.throttles =
                    Some(args.want_list("throttles")?.into_iter().map(ThrottleId::new).collect())
            }
            other => {
                return Err(KernelError::invalid(
                    args.command,
                    "option",
                    format!("unknown option: {other}"),
                ))
            }
        }
    }
    Ok(options)
}

fn parse_recur_options(args: &mut Args<'_>) -> KernelResult<RecurOptions> {
    let mut options = RecurOptions::default();
    while args.has_more() {
        let key = args.want_str("option")?;
        match key.as_str() {
            "priority" => options.priority = Some(args.want_i64("priority")?),
            "retries" => options.retries = Some(args.want_i64("retries")?),
            "backlog" => options.backlog = Some(args.want_i64("backlog")?),
            "tags" => options.tags = Some(tags(args.want_list("tags")?)),
            "throttles" => {
                options.throttles =
                    Some(args.want_list("throttles")?.into_iter().map(ThrottleId::new).collect())
            }
            other => {
                return Err(KernelError::invalid(
                    args.command,
                    "option",
                    format!("unknown option: {other}"),
                ))
            }
        }
    }
    Ok(options)
}

/// Trailing `[next] [delay n] [depends J]` of the complete family. For
/// `job.complete` the `next` segment is absent and extra options rejected.
fn parse_complete_next(
    args: &mut Args<'_>,
    next: Option<QueueName>,
) -> KernelResult<Option<CompleteNext>> {
    let Some(queue) = next else {
        return Ok(None);
    };
    let mut delay = 0.0;
    let mut depends = Vec::new();
    while args.has_more() {
        let key = args.want_str("option")?;
        match key.as_str() {
            "delay" => delay = args.want_f64("delay")?,
            "depends" => depends = jids(args.want_list("depends")?),
            other => {
                return Err(KernelError::invalid(
                    args.command,
                    "option",
                    format!("unknown option: {other}"),
                ))
            }
        }
    }
    Ok(Some(CompleteNext { queue, delay, depends }))
}

fn parse_recurring_updates(args: &mut Args<'_>) -> KernelResult<Vec<RecurringUpdate>> {
    let mut updates = Vec::new();
    while args.has_more() {
        let key = args.want_str("option")?;
        updates.push(match key.as_str() {
            "priority" => RecurringUpdate::Priority(args.want_i64("priority")?),
            "interval" => RecurringUpdate::Interval(args.want_f64("interval")?),
            "retries" => RecurringUpdate::Retries(args.want_i64("retries")?),
            "backlog" => RecurringUpdate::Backlog(args.want_i64("backlog")?),
            "data" => RecurringUpdate::Data(args.want_data("data")?),
            "klass" => RecurringUpdate::Klass(args.want_str("klass")?),
            "queue" => RecurringUpdate::Queue(QueueName::new(args.want_str("queue")?)),
            "throttles" => RecurringUpdate::Throttles(
                args.want_list("throttles")?.into_iter().map(ThrottleId::new).collect(),
            ),
            other => {
                return Err(KernelError::invalid(
                    args.command,
                    "option",
                    format!("unknown option: {other}"),
                ))
            }
        });
    }
    Ok(updates)
}

impl Command {
    /// Parse an invocation. `values[0]` is the logical timestamp `now`.
    pub fn parse(name: &str, values: &[Value]) -> KernelResult<(Timestamp, Command)> {
        let now = values
            .first()
            .and_then(as_f64)
            .filter(|now| now.is_finite() && *now >= 0.0)
            .ok_or_else(|| KernelError::BadTime { command: name.to_string() })?;
        let command = Self::parse_named(name, &values[1..])?;
        Ok((now, command))
    }

    fn parse_named(name: &str, rest: &[Value]) -> KernelResult<Command> {
        match name {
            "config.get" => {
                let mut args = Args::new("config.get", rest);
                Ok(Command::ConfigGet { key: args.opt_str("key")? })
            }
            "config.getAll" => Ok(Command::ConfigGetAll),
            "config.set" => {
                let mut args = Args::new("config.set", rest);
                let key = args.want_str("key")?;
                let value = args.next().cloned().ok_or_else(|| args.missing("value"))?;
                Ok(Command::ConfigSet { key, value })
            }
            "config.unset" => {
                let mut args = Args::new("config.unset", rest);
                Ok(Command::ConfigUnset { key: args.want_str("key")? })
            }

            "queue.put" | "put" => parse_put(rest, false),
            "job.requeue" | "requeue" => parse_put(rest, true),
            "queue.pop" | "pop" => {
                let mut args = Args::new("queue.pop", rest);
                Ok(Command::Pop {
                    queue: QueueName::new(args.want_str("queue")?),
                    worker: WorkerName::new(args.want_str("worker")?),
                    count: args.want_usize("count")?,
                })
            }
            "queue.peek" | "peek" => {
                let mut args = Args::new("queue.peek", rest);
                Ok(Command::Peek {
                    queue: QueueName::new(args.want_str("queue")?),
                    offset: args.want_usize("offset")?,
                    count: args.want_usize("count")?,
                })
            }
            "queue.pause" => {
                let mut args = Args::new("queue.pause", rest);
                Ok(Command::Pause { queue: QueueName::new(args.want_str("queue")?) })
            }
            "queue.unpause" => {
                let mut args = Args::new("queue.unpause", rest);
                Ok(Command::Unpause { queue: QueueName::new(args.want_str("queue")?) })
            }
            "queue.counts" | "stats" => {
                let mut args = Args::new("queue.counts", rest);
                Ok(Command::QueueCounts { queue: args.opt_str("queue")?.map(QueueName::new) })
            }
            "queues.counts" => Ok(Command::QueuesCounts),
            "queues" => {
                let mut args = Args::new("queues", rest);
                match args.opt_str("queue")? {
                    Some(queue) => {
                        Ok(Command::QueueCounts { queue: Some(QueueName::new(queue)) })
                    }
                    None => Ok(Command::QueuesCounts),
                }
            }
            "queues.names" => Ok(Command::QueueNames),
            "queue.jobsByState" | "jobs" => parse_jobs_by_state(rest),
            "queue.unfail" | "unfail" => {
                let mut args = Args::new("queue.unfail", rest);
                Ok(Command::Unfail {
                    queue: QueueName::new(args.want_str("queue")?),
                    group: Group::new(args.want_str("group")?),
                    count: args.opt_usize("count", 25)?,
                })
            }
            "queue.throttle.set" => {
                let mut args = Args::new("queue.throttle.set", rest);
                Ok(Command::QueueThrottleSet {
                    queue: QueueName::new(args.want_str("queue")?),
                    maximum: args.want_i64("maximum")?,
                })
            }
            "queue.throttle.get" => {
                let mut args = Args::new("queue.throttle.get", rest);
                Ok(Command::QueueThrottleGet { queue: QueueName::new(args.want_str("queue")?) })
            }
            "queue.recurAtInterval" | "recur" => {
                let mut args = Args::new("queue.recurAtInterval", rest);
                let queue = QueueName::new(args.want_str("queue")?);
                let jid = JobId::new(args.want_str("jid")?);
                let klass = args.want_str("klass")?;
                let data = args.want_data("data")?;
                let interval = args.want_f64("interval")?;
                let offset = args.want_f64("offset")?;
                let options = parse_recur_options(&mut args)?;
                Ok(Command::RecurAtInterval { queue, jid, klass, data, interval, offset, options })
            }

            "job.get" | "get" => {
                let mut args = Args::new("job.get", rest);
                Ok(Command::JobGet { jid: JobId::new(args.want_str("jid")?) })
            }
            "job.getMulti" | "multiget" => {
                let mut args = Args::new("job.getMulti", rest);
                Ok(Command::JobGetMulti { jids: jids(args.rest_strs("jid")?) })
            }
            "job.complete" | "job.completeAndRequeue" | "complete" => {
                let requeues = name == "job.completeAndRequeue";
                let mut args = Args::new("job.complete", rest);
                let jid = JobId::new(args.want_str("jid")?);
                let worker = WorkerName::new(args.want_str("worker")?);
                let queue = QueueName::new(args.want_str("queue")?);
                let data = args.want_data("data")?;
                let next = if requeues {
                    Some(QueueName::new(args.want_str("next")?))
                } else if name == "complete" && args.has_more() {
                    // Deprecated form carries `next` as a keyword option.
                    match args.want_str("option")?.as_str() {
                        "next" => Some(QueueName::new(args.want_str("next")?)),
                        other => {
                            return Err(KernelError::invalid(
                                "job.complete",
                                "option",
                                format!("unknown option: {other}"),
                            ))
                        }
                    }
                } else {
                    None
                };
                let next = parse_complete_next(&mut args, next)?;
                Ok(Command::Complete { jid, worker, queue, data, next })
            }
            "job.fail" | "fail" => {
                let mut args = Args::new("job.fail", rest);
                let jid = JobId::new(args.want_str("jid")?);
                let worker = WorkerName::new(args.want_str("worker")?);
                let group = Group::new(args.want_str("group")?);
                let message = args.want_str("message")?;
                let data = if args.has_more() { Some(args.want_data("data")?) } else { None };
                Ok(Command::Fail { jid, worker, group, message, data })
            }
            "job.retry" | "retry" => {
                let mut args = Args::new("job.retry", rest);
                let jid = JobId::new(args.want_str("jid")?);
                let queue = QueueName::new(args.want_str("queue")?);
                let worker = WorkerName::new(args.want_str("worker")?);
                let delay = args.opt_f64("delay")?.unwrap_or(0.0);
                let failure = match args.opt_str("group")? {
                    Some(group) => Some((Group::new(group), args.want_str("message")?)),
                    None => None,
                };
                Ok(Command::Retry { jid, queue, worker, delay, failure })
            }
            "job.heartbeat" | "heartbeat" => {
                let mut args = Args::new("job.heartbeat", rest);
                let jid = JobId::new(args.want_str("jid")?);
                let worker = WorkerName::new(args.want_str("worker")?);
                let data = if args.has_more() { Some(args.want_data("data")?) } else { None };
                Ok(Command::Heartbeat { jid, worker, data })
            }
            "job.timeout" | "timeout" => {
                let mut args = Args::new("job.timeout", rest);
                Ok(Command::Timeout { jids: jids(args.rest_strs("jid")?) })
            }
            "job.cancel" | "cancel" => {
                let mut args = Args::new("job.cancel", rest);
                Ok(Command::Cancel { jids: jids(args.rest_strs("jid")?) })
            }
            "job.log" | "log" => {
                let mut args = Args::new("job.log", rest);
                let jid = JobId::new(args.want_str("jid")?);
                let what = args.want_str("what")?;
                let data = args.opt_map("data")?;
                Ok(Command::Log { jid, what, data })
            }
            "job.setPriority" | "priority" => {
                let mut args = Args::new("job.setPriority", rest);
                Ok(Command::SetPriority {
                    jid: JobId::new(args.want_str("jid")?),
                    priority: args.want_i64("priority")?,
                })
            }
            "job.track" => {
                let mut args = Args::new("job.track", rest);
                Ok(Command::Track { jid: JobId::new(args.want_str("jid")?) })
            }
            "job.untrack" => {
                let mut args = Args::new("job.untrack", rest);
                Ok(Command::Untrack { jid: JobId::new(args.want_str("jid")?) })
            }
            "track" => {
                let mut args = Args::new("track", rest);
                match args.opt_str("subcommand")? {
                    None => Ok(Command::JobsTracked),
                    Some(sub) => {
                        let jid = JobId::new(args.want_str("jid")?);
                        match sub.as_str() {
                            "track" => Ok(Command::Track { jid }),
                            "untrack" => Ok(Command::Untrack { jid }),
                            other => Err(KernelError::invalid(
                                "track",
                                "subcommand",
                                format!("unknown subcommand: {other}"),
                            )),
                        }
                    }
                }
            }
            "job.addDependency" => {
                let mut args = Args::new("job.addDependency", rest);
                let jid = JobId::new(args.want_str("jid")?);
                Ok(Command::AddDependency { jid, on: jids(args.rest_strs("jid")?) })
            }
            "job.removeDependency" => {
                let mut args = Args::new("job.removeDependency", rest);
                let jid = JobId::new(args.want_str("jid")?);
                Ok(Command::RemoveDependency { jid, off: jids(args.rest_strs("jid")?) })
            }
            "depends" => {
                let mut args = Args::new("depends", rest);
                let jid = JobId::new(args.want_str("jid")?);
                let direction = args.want_str("direction")?;
                let targets = jids(args.rest_strs("jid")?);
                match direction.as_str() {
                    "on" => Ok(Command::AddDependency { jid, on: targets }),
                    "off" => Ok(Command::RemoveDependency { jid, off: targets }),
                    other => Err(KernelError::invalid(
                        "depends",
                        "direction",
                        format!("expected on or off: {other}"),
                    )),
                }
            }
            "job.addTag" => {
                let mut args = Args::new("job.addTag", rest);
                let jid = JobId::new(args.want_str("jid")?);
                Ok(Command::AddTag { jid, tags: tags(args.rest_strs("tag")?) })
            }
            "job.removeTag" => {
                let mut args = Args::new("job.removeTag", rest);
                let jid = JobId::new(args.want_str("jid")?);
                Ok(Command::RemoveTag { jid, tags: tags(args.rest_strs("tag")?) })
            }
            "tag" => {
                let mut args = Args::new("tag", rest);
                let sub = args.want_str("subcommand")?;
                match sub.as_str() {
                    "add" => {
                        let jid = JobId::new(args.want_str("jid")?);
                        Ok(Command::AddTag { jid, tags: tags(args.rest_strs("tag")?) })
                    }
                    "remove" => {
                        let jid = JobId::new(args.want_str("jid")?);
                        Ok(Command::RemoveTag { jid, tags: tags(args.rest_strs("tag")?) })
                    }
                    "get" => {
                        let tag = Tag::new(args.want_str("tag")?);
                        let offset = args.opt_usize("offset", 0)?;
                        let count = args.opt_usize("count", 25)?;
                        Ok(Command::JobsTagged { tag, offset, count })
                    }
                    "top" => {
                        let offset = args.opt_usize("offset", 0)?;
                        let count = args.opt_usize("count", 25)?;
                        Ok(Command::TagsTop { offset, count })
                    }
                    other => Err(KernelError::invalid(
                        "tag",
                        "subcommand",
                        format!("unknown subcommand: {other}"),
                    )),
                }
            }

            "jobs.completed" => {
                let mut args = Args::new("jobs.completed", rest);
                Ok(Command::JobsCompleted {
                    offset: args.opt_usize("offset", 0)?,
                    count: args.opt_usize("count", 25)?,
                })
            }
            "jobs.tracked" => Ok(Command::JobsTracked),
            "jobs.tagged" => {
                let mut args = Args::new("jobs.tagged", rest);
                Ok(Command::JobsTagged {
                    tag: Tag::new(args.want_str("tag")?),
                    offset: args.opt_usize("offset", 0)?,
                    count: args.opt_usize("count", 25)?,
                })
            }
            "jobs.failedByGroup" => {
                let mut args = Args::new("jobs.failedByGroup", rest);
                Ok(Command::JobsFailedByGroup {
                    group: Group::new(args.want_str("group")?),
                    offset: args.opt_usize("offset", 0)?,
                    count: args.opt_usize("count", 25)?,
                })
            }
            "failureGroups.counts" => Ok(Command::FailureGroupsCounts),
            "failed" => {
                let mut args = Args::new("failed", rest);
                match args.opt_str("group")? {
                    None => Ok(Command::FailureGroupsCounts),
                    Some(group) => Ok(Command::JobsFailedByGroup {
                        group: Group::new(group),
                        offset: args.opt_usize("offset", 0)?,
                        count: args.opt_usize("count", 25)?,
                    }),
                }
            }
            "tags.top" => {
                let mut args = Args::new("tags.top", rest);
                Ok(Command::TagsTop {
                    offset: args.opt_usize("offset", 0)?,
                    count: args.opt_usize("count", 25)?,
                })
            }

            "recurringJob.get" => {
                let mut args = Args::new("recurringJob.get", rest);
                Ok(Command::RecurringGet { jid: JobId::new(args.want_str("jid")?) })
            }
            "recurringJob.update" => {
                let mut args = Args::new("recurringJob.update", rest);
                let jid = JobId::new(args.want_str("jid")?);
                let updates = parse_recurring_updates(&mut args)?;
                Ok(Command::RecurringUpdate { jid, updates })
            }
            "recurringJob.cancel" => {
                let mut args = Args::new("recurringJob.cancel", rest);
                Ok(Command::RecurringCancel { jids: jids(args.rest_strs("jid")?) })
            }
            "recurringJob.addTag" => {
                let mut args = Args::new("recurringJob.addTag", rest);
                let jid = JobId::new(args.want_str("jid")?);
                Ok(Command::RecurringAddTag { jid, tags: tags(args.rest_strs("tag")?) })
            }
            "recurringJob.removeTag" => {
                let mut args = Args::new("recurringJob.removeTag", rest);
                let jid = JobId::new(args.want_str("jid")?);
                Ok(Command::RecurringRemoveTag { jid, tags: tags(args.rest_strs("tag")?) })
            }

            "throttle.set" => {
                let mut args = Args::new("throttle.set", rest);
                Ok(Command::ThrottleSet {
                    id: ThrottleId::new(args.want_str("id")?),
                    maximum: args.want_i64("maximum")?,
                    ttl: args.opt_f64("ttl")?.unwrap_or(0.0),
                })
            }
            "throttle.get" => {
                let mut args = Args::new("throttle.get", rest);
                Ok(Command::ThrottleGet { id: ThrottleId::new(args.want_str("id")?) })
            }
            "throttle.delete" => {
                let mut args = Args::new("throttle.delete", rest);
                Ok(Command::ThrottleDelete { id: ThrottleId::new(args.want_str("id")?) })
            }
            "throttle.release" => {
                let mut args = Args::new("throttle.release", rest);
                let id = ThrottleId::new(args.want_str("id")?);
                Ok(Command::ThrottleRelease { id, jids: jids(args.rest_strs("jid")?) })
            }
            "throttle.ttl" => {
                let mut args = Args::new("throttle.ttl", rest);
                Ok(Command::ThrottleTtl { id: ThrottleId::new(args.want_str("id")?) })
            }
            "throttle.locks" => {
                let mut args = Args::new("throttle.locks", rest);
                Ok(Command::ThrottleLocks { id: ThrottleId::new(args.want_str("id")?) })
            }
            "throttle.pending" => {
                let mut args = Args::new("throttle.pending", rest);
                Ok(Command::ThrottlePending { id: ThrottleId::new(args.want_str("id")?) })
            }

            "worker.jobs" => {
                let mut args = Args::new("worker.jobs", rest);
                Ok(Command::WorkerJobs { worker: WorkerName::new(args.want_str("worker")?) })
            }
            "worker.forget" => {
                let mut args = Args::new("worker.forget", rest);
                let workers =
                    args.rest_strs("worker")?.into_iter().map(WorkerName::new).collect();
                Ok(Command::WorkerForget { workers })
            }
            "workers.counts" => Ok(Command::WorkersCounts),
            "workers" => {
                let mut args = Args::new("workers", rest);
                match args.opt_str("worker")? {
                    None => Ok(Command::WorkersCounts),
                    Some(worker) => {
                        Ok(Command::WorkerJobs { worker: WorkerName::new(worker) })
                    }
                }
            }

            "queueIdentifierPatterns.getAll" => Ok(Command::IdentifierPatternsGetAll),
            "queueIdentifierPatterns.setAll" => {
                let mut args = Args::new("queueIdentifierPatterns.setAll", rest);
                let mut entries = Vec::new();
                while args.has_more() {
                    let key = args.want_str("identifier")?;
                    let patterns = args.want_list("patterns")?;
                    entries.push((key, patterns));
                }
                Ok(Command::IdentifierPatternsSetAll { entries })
            }
            "queuePriorityPatterns.getAll" => Ok(Command::PriorityPatternsGetAll),
            "queuePriorityPatterns.setAll" => {
                let mut args = Args::new("queuePriorityPatterns.setAll", rest);
                let mut entries = Vec::new();
                while args.has_more() {
                    let value = match args.next() {
                        Some(Value::String(s)) => serde_json::from_str::<PriorityPattern>(s),
                        Some(value) => serde_json::from_value(value.clone()),
                        None => break,
                    };
                    match value {
                        Ok(pattern) => entries.push(pattern),
                        Err(err) => {
                            return Err(KernelError::invalid(
                                "queuePriorityPatterns.setAll",
                                "pattern",
                                format!("not a priority pattern: {err}"),
                            ))
                        }
                    }
                }
                Ok(Command::PriorityPatternsSetAll { entries })
            }

            other => Err(KernelError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse_put(rest: &[Value], requeue: bool) -> KernelResult<Command> {
    let mut args = Args::new(if requeue { "job.requeue" } else { "queue.put" }, rest);
    let worker = WorkerName::new(args.want_str("worker")?);
    let queue = QueueName::new(args.want_str("queue")?);
    let jid = JobId::new(args.want_str("jid")?);
    let klass = args.want_str("klass")?;
    let data = args.want_data("data")?;
    let delay = args.want_f64("delay")?;
    let options = parse_put_options(&mut args)?;
    if requeue {
        Ok(Command::Requeue { worker, queue, jid, klass, data, delay, options })
    } else {
        Ok(Command::Put { worker, queue, jid, klass, data, delay, options })
    }
}

fn parse_jobs_by_state(rest: &[Value]) -> KernelResult<Command> {
    let mut args = Args::new("queue.jobsByState", rest);
    let state = args.want_str("state")?;
    if state == "complete" {
        return Ok(Command::JobsCompleted {
            offset: args.opt_usize("offset", 0)?,
            count: args.opt_usize("count", 25)?,
        });
    }
    let queue = QueueName::new(args.want_str("queue")?);
    Ok(Command::JobsByState {
        state,
        queue,
        offset: args.opt_usize("offset", 0)?,
        count: args.opt_usize("count", 25)?,
    })
}

/// Run a parsed command against the state.
pub fn execute(state: &mut KernelState, now: Timestamp, command: Command) -> KernelResult<Reply> {
    match command {
        Command::ConfigGet { key } => match key {
            Some(key) => Ok(Reply::Config(state.config_get(&key))),
            None => Ok(Reply::ConfigAll(state.config_get_all())),
        },
        Command::ConfigGetAll => Ok(Reply::ConfigAll(state.config_get_all())),
        Command::ConfigSet { key, value } => {
            state.config_set(&key, value);
            Ok(Reply::Ack)
        }
        Command::ConfigUnset { key } => {
            state.config_unset(&key);
            Ok(Reply::Ack)
        }

        Command::Put { worker, queue, jid, klass, data, delay, options } => Ok(Reply::Jid(
            state.put(now, &worker, &queue, &jid, &klass, &data, delay, options)?,
        )),
        Command::Requeue { worker, queue, jid, klass, data, delay, options } => Ok(Reply::Jid(
            state.requeue(now, &worker, &queue, &jid, &klass, &data, delay, options)?,
        )),
        Command::Pop { queue, worker, count } => {
            Ok(Reply::Jobs(state.pop(now, &queue, &worker, count)?))
        }
        Command::Peek { queue, offset, count } => {
            Ok(Reply::Jobs(state.peek(now, &queue, offset, count)?))
        }
        Command::Pause { queue } => {
            state.queue_pause(&queue);
            Ok(Reply::Ack)
        }
        Command::Unpause { queue } => {
            state.queue_unpause(&queue);
            Ok(Reply::Ack)
        }
        Command::QueueCounts { queue } => match queue {
            Some(queue) => Ok(Reply::QueueCounts(Box::new(state.queue_counts(now, &queue)))),
            None => Ok(Reply::QueuesCounts(state.queues_counts(now))),
        },
        Command::QueuesCounts => Ok(Reply::QueuesCounts(state.queues_counts(now))),
        Command::QueueNames => Ok(Reply::QueueNames(state.queue_names())),
        Command::JobsByState { state: job_state, queue, offset, count } => Ok(Reply::Jids(
            state.jobs_by_state(now, &job_state, &queue, offset, count)?,
        )),
        Command::Unfail { queue, group, count } => {
            Ok(Reply::Count(state.unfail(now, &queue, &group, count)?))
        }
        Command::QueueThrottleSet { queue, maximum } => {
            state.queue_throttle_set(now, &queue, maximum);
            Ok(Reply::Ack)
        }
        Command::QueueThrottleGet { queue } => {
            Ok(Reply::Throttle(state.queue_throttle_get(now, &queue)))
        }
        Command::RecurAtInterval { queue, jid, klass, data, interval, offset, options } => {
            Ok(Reply::Jid(state.recur_at_interval(
                now, &queue, &jid, &klass, &data, interval, offset, options,
            )?))
        }

        Command::JobGet { jid } => Ok(Reply::Job(state.job_get(now, &jid).map(Box::new))),
        Command::JobGetMulti { jids } => Ok(Reply::Jobs(state.job_get_multi(now, &jids))),
        Command::Complete { jid, worker, queue, data, next } => Ok(Reply::Text(
            state.complete(now, &jid, &worker, &queue, &data, next)?,
        )),
        Command::Fail { jid, worker, group, message, data } => Ok(Reply::Jid(state.fail(
            now,
            &jid,
            &worker,
            &group,
            &message,
            data.as_deref(),
        )?)),
        Command::Retry { jid, queue, worker, delay, failure } => Ok(Reply::Int(
            state.retry(now, &jid, &queue, &worker, delay, failure)?,
        )),
        Command::Heartbeat { jid, worker, data } => Ok(Reply::Number(
            state.heartbeat(now, &jid, &worker, data.as_deref())?,
        )),
        Command::Timeout { jids } => {
            state.timeout(now, &jids)?;
            Ok(Reply::Ack)
        }
        Command::Cancel { jids } => {
            state.cancel(now, &jids)?;
            Ok(Reply::Jids(jids))
        }
        Command::Log { jid, what, data } => {
            state.job_log(now, &jid, &what, data)?;
            Ok(Reply::Ack)
        }
        Command::SetPriority { jid, priority } => {
            state.set_priority(now, &jid, priority)?;
            Ok(Reply::Int(priority))
        }
        Command::Track { jid } => {
            state.track(now, &jid)?;
            Ok(Reply::Ack)
        }
        Command::Untrack { jid } => {
            state.untrack(now, &jid)?;
            Ok(Reply::Ack)
        }
        Command::AddDependency { jid, on } => {
            state.add_dependency(now, &jid, &on)?;
            Ok(Reply::Ack)
        }
        Command::RemoveDependency { jid, off } => {
            state.remove_dependency(now, &jid, &off)?;
            Ok(Reply::Ack)
        }
        Command::AddTag { jid, tags } => Ok(Reply::Tags(state.add_tags(now, &jid, &tags)?)),
        Command::RemoveTag { jid, tags } => Ok(Reply::Tags(state.remove_tags(&jid, &tags)?)),

        Command::JobsCompleted { offset, count } => {
            Ok(Reply::Jids(state.jobs_completed(offset, count)))
        }
        Command::JobsTracked => Ok(Reply::Tracked(state.tracked_report(now))),
        Command::JobsTagged { tag, offset, count } => {
            Ok(Reply::Tagged(state.jobs_tagged(&tag, offset, count)))
        }
        Command::JobsFailedByGroup { group, offset, count } => {
            Ok(Reply::Failed(state.failed_by_group(&group, offset, count)))
        }
        Command::FailureGroupsCounts => Ok(Reply::FailureCounts(state.failure_groups_counts())),
        Command::TagsTop { offset, count } => Ok(Reply::Tags(state.tags_top(offset, count))),

        Command::RecurringGet { jid } => {
            Ok(Reply::Recurring(state.recurring_get(&jid).map(Box::new)))
        }
        Command::RecurringUpdate { jid, updates } => {
            Ok(Reply::Jid(state.recurring_update(now, &jid, updates)?))
        }
        Command::RecurringCancel { jids } => {
            state.recurring_cancel(&jids)?;
            Ok(Reply::Jids(jids))
        }
        Command::RecurringAddTag { jid, tags } => {
            Ok(Reply::Tags(state.recurring_add_tags(&jid, &tags)?))
        }
        Command::RecurringRemoveTag { jid, tags } => {
            Ok(Reply::Tags(state.recurring_remove_tags(&jid, &tags)?))
        }

        Command::ThrottleSet { id, maximum, ttl } => {
            state.throttle_set(now, &id, maximum, ttl);
            Ok(Reply::Ack)
        }
        Command::ThrottleGet { id } => Ok(Reply::Throttle(state.throttle_get(now, &id))),
        Command::ThrottleDelete { id } => {
            state.throttle_delete(now, &id);
            Ok(Reply::Ack)
        }
        Command::ThrottleRelease { id, jids } => {
            state.throttle_release_jids(now, &id, &jids);
            Ok(Reply::Ack)
        }
        Command::ThrottleTtl { id } => Ok(Reply::Number(state.throttle_ttl(now, &id))),
        Command::ThrottleLocks { id } => Ok(Reply::Jids(state.throttle_locks(&id))),
        Command::ThrottlePending { id } => Ok(Reply::Jids(state.throttle_pending(&id))),

        Command::WorkerJobs { worker } => Ok(Reply::WorkerJobs(state.worker_jobs(now, &worker))),
        Command::WorkerForget { workers } => {
            state.worker_forget(&workers);
            Ok(Reply::Ack)
        }
        Command::WorkersCounts => Ok(Reply::WorkersCounts(state.workers_counts(now))),

        Command::IdentifierPatternsGetAll => {
            Ok(Reply::IdentifierPatterns(state.identifier_patterns_get_all()))
        }
        Command::IdentifierPatternsSetAll { entries } => {
            state.identifier_patterns_set_all(entries)?;
            Ok(Reply::Ack)
        }
        Command::PriorityPatternsGetAll => {
            Ok(Reply::PriorityPatterns(state.priority_patterns_get_all()))
        }
        Command::PriorityPatternsSetAll { entries } => {
            state.priority_patterns_set_all(entries)?;
            Ok(Reply::Ack)
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "property_tests.rs"]
mod property_tests;
