// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recurring template expansion

use crate::prelude::*;

fn recur(broker: &Broker, now: f64, interval: f64, offset: f64) {
    broker.run(
        "queue.recurAtInterval",
        &[json!(now), json!("queue"), json!("jid"), json!("klass"), json!({}), json!(interval), json!(offset)],
    );
}

#[test]
fn expansion_covers_every_missed_interval() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 0.0);
    let popped = broker.run("queue.pop", &[json!(599), json!("queue"), json!("worker"), json!(10)]);
    let jids: Vec<String> = (1..=10).map(|index| format!("jid-{index}")).collect();
    assert_eq!(jids_of(&popped), jids);
    let times: Vec<f64> = popped
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["history"][0]["when"].as_f64().unwrap())
        .collect();
    assert_eq!(times, vec![0.0, 60.0, 120.0, 180.0, 240.0, 300.0, 360.0, 420.0, 480.0, 540.0]);
}

#[test]
fn children_spawn_only_when_due() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 0.0);
    assert_eq!(broker.pop(0.0, "queue", 10), vec!["jid-1"]);
    assert_eq!(broker.job(0.0, "jid-1")["spawned_from_jid"], "jid");
    assert_eq!(broker.pop(59.0, "queue", 10), Vec::<String>::new());
    assert_eq!(broker.pop(61.0, "queue", 10), vec!["jid-2"]);
}

#[test]
fn offset_shifts_the_first_spawn() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 10.0);
    assert_eq!(broker.pop(9.0, "queue", 10), Vec::<String>::new());
    assert_eq!(broker.pop(11.0, "queue", 10), vec!["jid-1"]);
    assert_eq!(broker.pop(69.0, "queue", 10), Vec::<String>::new());
    assert_eq!(broker.pop(71.0, "queue", 10), vec!["jid-2"]);
}

#[test]
fn backlog_fast_forwards_missed_spawns() {
    let broker = Broker::new();
    broker.run(
        "queue.recurAtInterval",
        &[json!(0), json!("queue"), json!("jid"), json!("klass"), json!({}), json!(60), json!(0), json!("backlog"), json!(1)],
    );
    let popped = broker.pop(600.0, "queue", 10);
    assert_eq!(popped, vec!["jid-1", "jid-2"]);
}

#[test]
fn children_carry_template_attributes() {
    let broker = Broker::new();
    broker.run(
        "queue.recurAtInterval",
        &[
            json!(0),
            json!("queue"),
            json!("jid"),
            json!("klass"),
            json!({}),
            json!(60),
            json!(0),
            json!("tags"),
            json!(["foo", "bar"]),
            json!("priority"),
            json!(10),
            json!("retries"),
            json!(2),
        ],
    );
    let popped = broker.run("queue.pop", &[json!(0), json!("queue"), json!("worker"), json!(10)]);
    let child = &popped[0];
    assert_eq!(child["jid"], "jid-1");
    assert_eq!(child["tags"], json!(["foo", "bar"]));
    assert_eq!(child["priority"], 10);
    assert_eq!(child["retries"], 2);
    assert_eq!(child["remaining"], 2);
    assert_eq!(child["state"], "running");
    // Tagged children land in the tag index
    let tagged = broker.run("jobs.tagged", &[json!(0), json!("foo"), json!(0), json!(0)]);
    assert_eq!(tagged["jobs"], json!(["jid-1"]));
}

#[test]
fn peek_expands_templates_too() {
    let broker = Broker::new();
    recur(&broker, 0.0, 10.0, 0.0);
    let peeked = broker.run("queue.peek", &[json!(99), json!("queue"), json!(0), json!(100)]);
    assert_eq!(peeked.as_array().unwrap().len(), 10);
}

#[test]
fn template_counts_as_recurring_in_queue_counts() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 10.0);
    let counts = broker.run("queue.counts", &[json!(0), json!("queue")]);
    assert_eq!(counts["recurring"], 1);
    assert_eq!(
        broker.run("queue.jobsByState", &[json!(0), json!("recurring"), json!("queue")]),
        json!(["jid"])
    );
}

#[test]
fn rerecurring_updates_without_resetting_the_counter() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 0.0);
    assert_eq!(broker.pop(0.0, "queue", 10), vec!["jid-1"]);
    recur(&broker, 60.0, 60.0, 0.0);
    assert_eq!(broker.pop(60.0, "queue", 10), vec!["jid-2"]);
}

#[test]
fn update_moves_between_queues_and_swaps_the_throttle() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 0.0);
    assert_eq!(broker.pop(0.0, "queue", 10), vec!["jid-1"]);
    broker.run(
        "recurringJob.update",
        &[json!(0), json!("jid"), json!("queue"), json!("other")],
    );
    assert_eq!(broker.pop(60.0, "queue", 10), Vec::<String>::new());
    let popped = broker.run("queue.pop", &[json!(60), json!("other"), json!("worker"), json!(10)]);
    assert_eq!(popped[0]["jid"], "jid-2");
    assert_eq!(popped[0]["throttles"], json!(["ql:q:other"]));
    // Both queues are known now
    let names = broker.run("queues.names", &[json!(61)]);
    assert_eq!(names, json!(["other", "queue"]));
}

#[test]
fn shortening_the_interval_backfills() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 0.0);
    assert_eq!(broker.pop(0.0, "queue", 10).len(), 1);
    broker.run(
        "recurringJob.update",
        &[json!(0), json!("jid"), json!("interval"), json!(10)],
    );
    assert_eq!(broker.pop(60.0, "queue", 10).len(), 6);
}

#[test]
fn cancel_stops_the_template() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 0.0);
    assert_eq!(broker.pop(0.0, "queue", 10).len(), 1);
    broker.run("recurringJob.cancel", &[json!(0), json!("jid")]);
    assert_eq!(broker.pop(60.0, "queue", 10), Vec::<String>::new());
    assert_eq!(broker.run("recurringJob.get", &[json!(0), json!("jid")]), Value::Null);
}

#[test]
fn template_snapshot_via_the_api() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 0.0);
    let snap = broker.run("recurringJob.get", &[json!(0), json!("jid")]);
    assert_eq!(snap["state"], "recur");
    assert_eq!(snap["interval"], 60.0);
    assert_eq!(snap["count"], 0);
    assert_eq!(snap["backlog"], 0);
    assert_eq!(snap["throttles"], json!(["ql:q:queue"]));
}

#[test]
fn template_tags_apply_to_future_children() {
    let broker = Broker::new();
    recur(&broker, 0.0, 60.0, 0.0);
    assert_eq!(broker.pop(0.0, "queue", 10), vec!["jid-1"]);
    broker.run("recurringJob.addTag", &[json!(0), json!("jid"), json!("foo")]);
    let popped = broker.run("queue.pop", &[json!(60), json!("queue"), json!("worker"), json!(10)]);
    assert_eq!(popped[0]["tags"], json!(["foo"]));
    broker.run("recurringJob.removeTag", &[json!(60), json!("jid"), json!("foo")]);
    let popped = broker.run("queue.pop", &[json!(120), json!("queue"), json!("worker"), json!(10)]);
    assert_eq!(popped[0]["tags"], json!([]));
}
