// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease expiry, grace, stall handover, and retry exhaustion

use crate::prelude::*;

#[test]
fn expired_leases_hand_over_with_one_attempt_burned() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put(0.0, "queue", "jid");
    let popped = broker.run("queue.pop", &[json!(0), json!("queue"), json!("worker"), json!(10)]);
    assert_eq!(popped[0]["expires"], 60.0);

    let events = broker.chatter(
        "queue.pop",
        &[json!(70), json!("queue"), json!("worker"), json!(10)],
    );
    let channels: Vec<&str> = events.iter().map(|(channel, _)| channel.as_str()).collect();
    assert_eq!(channels, vec!["ql:w:worker", "ql:log"]);
    assert_eq!(events[0].1["event"], "lock_lost");

    let job = broker.job(71.0, "jid");
    assert_eq!(job["state"], "running");
    assert_eq!(job["remaining"], 4);
    assert_eq!(job["worker"], "worker");
}

#[test]
fn grace_period_postpones_the_stall() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.pop(0.0, "queue", 10);
    // Lease expires at 60, but grace holds until 70
    assert_eq!(broker.pop(65.0, "queue", 10), Vec::<String>::new());
    assert_eq!(broker.pop(70.0, "queue", 10), vec!["jid"]);
}

#[test]
fn exhausted_retries_fail_out_of_the_sweep() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put_with(0.0, "queue", "jid", &[json!("retries"), json!(0)]);
    broker.pop(0.0, "queue", 10);
    assert_eq!(broker.pop(70.0, "queue", 10), Vec::<String>::new());

    let job = broker.job(71.0, "jid");
    assert_eq!(job["state"], "failed");
    assert_eq!(job["failure"]["group"], "failed-retries-queue");
    let counts = broker.run("failureGroups.counts", &[json!(72)]);
    assert_eq!(counts, json!({"failed-retries-queue": 1}));
}

#[test]
fn heartbeat_keeps_the_lease_alive() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put(0.0, "queue", "jid");
    broker.pop(0.0, "queue", 10);
    let expires = broker.run(
        "job.heartbeat",
        &[json!(50), json!("jid"), json!("worker"), json!({})],
    );
    assert_eq!(expires, 110.0);
    // The old expiry has passed but the lease holds
    assert_eq!(broker.pop(70.0, "queue", 10), Vec::<String>::new());
    assert_eq!(broker.state_of(70.0, "jid"), "running");
}

#[test]
fn heartbeat_needs_the_owning_worker() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    let message =
        broker.error("job.heartbeat", &[json!(1), json!("jid"), json!("worker"), json!({})]);
    assert!(message.contains("waiting"), "{message}");
    broker.pop(2.0, "queue", 10);
    let message =
        broker.error("job.heartbeat", &[json!(3), json!("jid"), json!("thief"), json!({})]);
    assert!(message.contains("another worker"), "{message}");
}

#[test]
fn a_lapsed_lease_goes_to_whoever_pops_first() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put(0.0, "queue", "jid");
    broker.pop(1.0, "queue", 10);
    assert_eq!(broker.pop_as(75.0, "queue", "another", 10), vec!["jid"]);
    let job = broker.job(76.0, "jid");
    assert_eq!(job["worker"], "another");
    // The original worker can no longer complete it
    let message = broker.error(
        "job.complete",
        &[json!(77), json!("jid"), json!("worker"), json!("queue"), json!({})],
    );
    assert!(message.contains("another worker"), "{message}");
}

#[test]
fn timeout_reclaims_a_lease_on_demand() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    broker.pop(1.0, "queue", 10);
    broker.run("job.timeout", &[json!(2), json!("jid")]);
    let job = broker.job(3.0, "jid");
    assert_eq!(job["state"], "stalled");
    assert_eq!(job["worker"], "");
    assert_eq!(job["expires"], 0.0);
    // And it goes straight back out on the next pop
    assert_eq!(broker.pop(4.0, "queue", 10), vec!["jid"]);
}

#[test]
fn timeout_requires_a_running_job() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    let message = broker.error("job.timeout", &[json!(1), json!("jid")]);
    assert!(message.contains("waiting"), "{message}");
    let message = broker.error("job.timeout", &[json!(1), json!("ghost")]);
    assert!(message.contains("does not exist"), "{message}");
}

#[test]
fn stalled_view_is_lazy_and_needs_no_sweep() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("heartbeat"), json!(10)]);
    for index in 0..10i64 {
        let jid = index.to_string();
        broker.put(index as f64, "queue", &jid);
        broker.pop(index as f64, "queue", 10);
        let stalled = broker.run(
            "queue.jobsByState",
            &[json!(index + 20), json!("stalled"), json!("queue")],
        );
        let listed = stalled.as_array().unwrap().len();
        assert_eq!(listed, index as usize + 1);
    }
}

#[test]
fn counts_partition_running_and_stalled() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put(0.0, "queue", "jid");
    let popped = broker.run("queue.pop", &[json!(1), json!("queue"), json!("worker"), json!(10)]);
    let past = popped[0]["expires"].as_f64().unwrap() + 10.0;
    let counts = broker.run("queue.counts", &[json!(past), json!("queue")]);
    assert_eq!(counts["stalled"], 1);
    assert_eq!(counts["running"], 0);
    let all = broker.run("queues.counts", &[json!(past)]);
    assert_eq!(all[0]["stalled"], 1);
}
