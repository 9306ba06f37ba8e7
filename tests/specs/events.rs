// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pub/sub chatter sequences

use crate::prelude::*;

fn channels(events: &[(String, Value)]) -> Vec<&str> {
    events.iter().map(|(channel, _)| channel.as_str()).collect()
}

#[test]
fn track_and_untrack_chirp() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    let events = broker.chatter("job.track", &[json!(0), json!("jid")]);
    assert_eq!(events, vec![("ql:track".to_string(), json!("jid"))]);
    let events = broker.chatter("job.untrack", &[json!(0), json!("jid")]);
    assert_eq!(events, vec![("ql:untrack".to_string(), json!("jid"))]);
}

#[test]
fn put_logs_and_chirps_for_tracked_jobs() {
    let broker = Broker::new();
    let events = broker.chatter(
        "queue.put",
        &[json!(0), json!("worker"), json!("queue"), json!("jid"), json!("klass"), json!({}), json!(0)],
    );
    assert_eq!(channels(&events), vec!["ql:log"]);
    assert_eq!(
        events[0].1,
        json!({"event": "put", "jid": "jid", "queue": "queue"})
    );

    broker.run("job.track", &[json!(0), json!("jid")]);
    let events = broker.chatter(
        "queue.put",
        &[json!(0), json!("worker"), json!("queue"), json!("jid"), json!("klass"), json!({}), json!(0)],
    );
    assert_eq!(channels(&events), vec!["ql:log", "ql:put"]);
    assert_eq!(events[1].1, json!("jid"));
}

#[test]
fn popping_a_tracked_job_chirps() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.run("job.track", &[json!(0), json!("jid")]);
    let events = broker.chatter(
        "queue.pop",
        &[json!(0), json!("queue"), json!("worker"), json!(10)],
    );
    assert_eq!(events, vec![("ql:popped".to_string(), json!("jid"))]);
}

#[test]
fn completing_a_tracked_job_chirps_before_the_log() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.run("job.track", &[json!(0), json!("jid")]);
    broker.pop(0.0, "queue", 10);
    let events = broker.chatter(
        "job.complete",
        &[json!(0), json!("jid"), json!("worker"), json!("queue"), json!({})],
    );
    assert_eq!(channels(&events), vec!["ql:completed", "ql:log"]);
    assert_eq!(events[0].1, json!("jid"));
    assert_eq!(
        events[1].1,
        json!({"event": "completed", "jid": "jid", "queue": "queue"})
    );
}

#[test]
fn failing_logs_then_chirps() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.run("job.track", &[json!(0), json!("jid")]);
    broker.pop(0.0, "queue", 10);
    let events = broker.chatter(
        "job.fail",
        &[json!(0), json!("jid"), json!("worker"), json!("grp"), json!("mess"), json!({})],
    );
    assert_eq!(channels(&events), vec!["ql:log", "ql:failed"]);
    assert_eq!(
        events[0].1,
        json!({"event": "failed", "jid": "jid", "group": "grp", "message": "mess", "worker": "worker"})
    );
}

#[test]
fn a_stall_chirps_stalled_then_lock_lost() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.run("job.track", &[json!(0), json!("jid")]);
    let popped = broker.run("queue.pop", &[json!(0), json!("queue"), json!("worker"), json!(10)]);
    let handover = popped[0]["expires"].as_f64().unwrap() + 10.0;
    let events = broker.chatter(
        "queue.pop",
        &[json!(handover), json!("queue"), json!("worker"), json!(10)],
    );
    assert_eq!(
        channels(&events),
        vec!["ql:stalled", "ql:w:worker", "ql:log", "ql:popped"]
    );
    assert_eq!(
        events[1].1,
        json!({"event": "lock_lost", "jid": "jid", "worker": "worker"})
    );
}

#[test]
fn retry_exhaustion_logs_the_failure() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put_with(0.0, "queue", "jid", &[json!("retries"), json!(0)]);
    let popped = broker.run("queue.pop", &[json!(0), json!("queue"), json!("worker"), json!(10)]);
    let handover = popped[0]["expires"].as_f64().unwrap() + 10.0;
    let events = broker.chatter(
        "queue.pop",
        &[json!(handover), json!("queue"), json!("worker"), json!(10)],
    );
    assert_eq!(channels(&events), vec!["ql:w:worker", "ql:log", "ql:log"]);
    assert_eq!(
        events[2].1,
        json!({
            "event": "failed",
            "jid": "jid",
            "group": "failed-retries-queue",
            "message": "Job exhausted retries in queue \"queue\"",
            "worker": "worker"
        })
    );
    assert_eq!(broker.state_of(handover + 1.0, "jid"), "failed");
}

#[test]
fn reput_by_another_worker_tells_the_owner() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.pop(0.0, "queue", 10);
    let events = broker.chatter(
        "queue.put",
        &[json!(0), json!("another"), json!("another"), json!("jid"), json!("klass"), json!({}), json!(10)],
    );
    assert_eq!(channels(&events), vec!["ql:log", "ql:w:worker", "ql:log"]);
    assert_eq!(events[0].1["event"], "put");
    assert_eq!(events[0].1["queue"], "another");
    assert_eq!(events[1].1["event"], "lock_lost");

    // Moving a job under its own worker is quiet about the lock
    broker.put(1.0, "queue", "jid2");
    broker.pop(1.0, "queue", 10);
    let events = broker.chatter(
        "queue.put",
        &[json!(1), json!("worker"), json!("queue"), json!("jid2"), json!("klass"), json!({}), json!(0)],
    );
    assert_eq!(channels(&events), vec!["ql:log"]);
}

#[test]
fn cancellation_chirps_per_audience() {
    let broker = Broker::new();
    broker.put(0.0, "q", "jid");
    broker.pop_as(0.0, "q", "wrk", 10);
    let events = broker.chatter("job.cancel", &[json!(0), json!("jid")]);
    assert_eq!(channels(&events), vec!["ql:log", "ql:w:wrk"]);
    let payload = json!({"event": "canceled", "jid": "jid", "queue": "q", "worker": "wrk"});
    assert_eq!(events[0].1, payload);
    assert_eq!(events[1].1, payload);
}

#[test]
fn cancelling_a_tracked_job_chirps_last() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.run("job.track", &[json!(0), json!("jid")]);
    let events = broker.chatter("job.cancel", &[json!(0), json!("jid")]);
    assert_eq!(channels(&events), vec!["ql:log", "ql:canceled"]);
    assert_eq!(
        events[0].1,
        json!({"event": "canceled", "jid": "jid", "queue": "queue", "worker": ""})
    );
    assert_eq!(events[1].1, json!("jid"));
}

#[test]
fn advancing_logs_the_transition() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.pop(0.0, "queue", 10);
    let events = broker.chatter(
        "job.complete",
        &[json!(0), json!("jid"), json!("worker"), json!("queue"), json!({}), json!("next"), json!("queue")],
    );
    assert_eq!(channels(&events), vec!["ql:log"]);
    assert_eq!(
        events[0].1,
        json!({"event": "advanced", "jid": "jid", "queue": "queue", "to": "queue"})
    );
}

#[test]
fn timeouts_notify_the_worker() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.pop(0.0, "queue", 10);
    let events = broker.chatter("job.timeout", &[json!(0), json!("jid")]);
    assert_eq!(channels(&events), vec!["ql:w:worker", "ql:log"]);
    assert_eq!(events[0].1["event"], "lock_lost");
}

#[test]
fn config_changes_are_logged() {
    let broker = Broker::new();
    let events = broker.chatter("config.set", &[json!(0), json!("foo"), json!("bar")]);
    assert_eq!(
        events,
        vec![(
            "ql:log".to_string(),
            json!({"event": "config_set", "option": "foo", "value": "bar"})
        )]
    );
    let events = broker.chatter("config.unset", &[json!(0), json!("foo")]);
    assert_eq!(
        events,
        vec![("ql:log".to_string(), json!({"event": "config_unset", "option": "foo"}))]
    );
}

#[test]
fn failed_calls_stay_silent() {
    let broker = Broker::new();
    assert!(broker
        .call("job.cancel", &[json!(0), json!("ghost")])
        .map(|outcome| outcome.events.is_empty())
        .unwrap_or(false));
    let err = broker.call(
        "job.complete",
        &[json!(0), json!("ghost"), json!("worker"), json!("queue"), json!({})],
    );
    assert!(err.is_err());
}
