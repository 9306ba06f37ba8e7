// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker registry specs

use crate::prelude::*;

#[test]
fn leases_show_under_the_holding_worker() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put(0.0, "queue", "jid");
    broker.pop(1.0, "queue", 10);
    let report = broker.run("worker.jobs", &[json!(2), json!("worker")]);
    assert_eq!(report, json!({"jobs": ["jid"], "stalled": []}));
    let counts = broker.run("workers.counts", &[json!(2)]);
    assert_eq!(counts, json!([{"name": "worker", "jobs": 1, "stalled": 0}]));
}

#[test]
fn expired_leases_report_as_stalled() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put(0.0, "queue", "jid");
    let popped = broker.run("queue.pop", &[json!(1), json!("queue"), json!("worker"), json!(10)]);
    let past = popped[0]["expires"].as_f64().unwrap() + 10.0;
    let report = broker.run("worker.jobs", &[json!(past), json!("worker")]);
    assert_eq!(report, json!({"jobs": [], "stalled": ["jid"]}));
    let counts = broker.run("workers.counts", &[json!(past)]);
    assert_eq!(counts[0]["stalled"], 1);
}

#[test]
fn a_lost_lock_leaves_the_original_worker() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("grace-period"), json!(0)]);
    broker.put(0.0, "queue", "jid");
    let popped = broker.run("queue.pop", &[json!(1), json!("queue"), json!("worker"), json!(10)]);
    let past = popped[0]["expires"].as_f64().unwrap() + 10.0;
    broker.pop_as(past, "queue", "another", 10);
    let report = broker.run("worker.jobs", &[json!(past), json!("worker")]);
    assert_eq!(report, json!({"jobs": [], "stalled": []}));
}

#[test]
fn every_lease_ending_clears_the_worker_entry() {
    let broker = Broker::new();
    let check_empty = |now: f64| {
        let report = broker.run("worker.jobs", &[json!(now), json!("worker")]);
        assert_eq!(report["jobs"], json!([]));
    };

    broker.put(0.0, "queue", "completes");
    broker.pop(0.0, "queue", 10);
    broker.complete(1.0, "completes", "queue");
    check_empty(1.0);

    broker.put(2.0, "queue", "fails");
    broker.pop(2.0, "queue", 10);
    broker.run(
        "job.fail",
        &[json!(3), json!("fails"), json!("worker"), json!("group"), json!("message"), json!({})],
    );
    check_empty(3.0);

    broker.put(4.0, "queue", "cancels");
    broker.pop(4.0, "queue", 10);
    broker.run("job.cancel", &[json!(5), json!("cancels")]);
    check_empty(5.0);

    broker.put(6.0, "queue", "retries");
    broker.pop(6.0, "queue", 10);
    broker.run("job.retry", &[json!(7), json!("retries"), json!("queue"), json!("worker")]);
    check_empty(7.0);

    broker.put(8.0, "queue", "moves");
    broker.pop(8.0, "queue", 10);
    broker.put(9.0, "queue", "moves");
    check_empty(9.0);
}

#[test]
fn forgotten_workers_disappear_from_counts() {
    let broker = Broker::new();
    for index in 0..5 {
        broker.put(0.0, "queue", &index.to_string());
    }
    for index in 0..5 {
        broker.pop_as(1.0, "queue", &format!("w{index}"), 1);
    }
    let names = |now: f64| -> Vec<String> {
        broker
            .run("workers.counts", &[json!(now)])
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["name"].as_str().unwrap().to_string())
            .collect()
    };
    assert!(names(2.0).contains(&"w3".to_string()));
    broker.run("worker.forget", &[json!(3), json!("w3")]);
    assert!(!names(3.0).contains(&"w3".to_string()));
}

#[test]
fn idle_workers_age_out_of_counts() {
    let broker = Broker::new();
    broker.run("config.set", &[json!(0), json!("max-worker-age"), json!(3600)]);
    broker.put(0.0, "queue", "jid");
    broker.pop(0.0, "queue", 10);
    broker.complete(0.0, "jid", "queue");
    assert_eq!(broker.run("workers.counts", &[json!(3600)]), json!([]));
}

#[test]
fn unknown_workers_report_empty() {
    let broker = Broker::new();
    let report = broker.run("worker.jobs", &[json!(0), json!("ghost")]);
    assert_eq!(report, json!({"jobs": [], "stalled": []}));
}
