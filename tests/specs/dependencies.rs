// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dependency graph specs

use crate::prelude::*;

#[test]
fn completion_unlocks_dependents() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "a");
    broker.put_with(0.0, "queue", "b", &[json!("depends"), json!(["a"])]);

    assert_eq!(broker.pop(1.0, "queue", 10), vec!["a"]);
    broker.complete(2.0, "a", "queue");
    assert_eq!(broker.pop(3.0, "queue", 10), vec!["b"]);
}

#[test]
fn unlock_with_pending_delay_schedules() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "a");
    broker.run(
        "queue.put",
        &[json!(0), json!("worker"), json!("queue"), json!("b"), json!("klass"), json!({}), json!(1000), json!("depends"), json!(["a"])],
    );
    assert_eq!(broker.pop(1.0, "queue", 10), vec!["a"]);
    broker.complete(2.0, "a", "queue");
    assert_eq!(broker.state_of(3.0, "b"), "scheduled");
    // Once the delay passes, a peek promotes it
    assert_eq!(broker.run("queue.peek", &[json!(1000), json!("queue"), json!(0), json!(10)]).as_array().unwrap().len(), 1);
    assert_eq!(broker.state_of(1001.0, "b"), "waiting");
}

#[test]
fn satisfied_dependencies_do_not_block() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "a");
    assert_eq!(broker.pop(1.0, "queue", 1), vec!["a"]);
    broker.complete(2.0, "a", "queue");
    broker.put_with(4.0, "queue", "b", &[json!("depends"), json!(["a"])]);
    assert_eq!(broker.state_of(5.0, "b"), "waiting");
}

#[test]
fn nonexistent_dependencies_count_as_complete() {
    let broker = Broker::new();
    broker.put_with(0.0, "queue", "b", &[json!("depends"), json!(["ghost"])]);
    assert_eq!(broker.state_of(1.0, "b"), "waiting");
}

#[test]
fn dependency_chains_unlock_one_at_a_time() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "0");
    for index in 1..10 {
        broker.put_with(
            index as f64,
            "queue",
            &index.to_string(),
            &[json!("depends"), json!([(index - 1).to_string()])],
        );
    }
    for index in 0..10 {
        let popped = broker.pop(100.0, "queue", 10);
        assert_eq!(popped, vec![index.to_string()]);
        broker.complete(100.0, &index.to_string(), "queue");
    }
}

#[test]
fn a_job_waits_for_every_dependency() {
    let broker = Broker::new();
    let deps: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    for dep in &deps {
        broker.put(0.0, "queue", dep);
    }
    broker.put_with(20.0, "queue", "jid", &[json!("depends"), json!(deps)]);
    for dep in &deps {
        assert_eq!(broker.state_of(30.0, "jid"), "depends");
        broker.pop(30.0, "queue", 1);
        broker.complete(30.0, dep, "queue");
    }
    assert_eq!(broker.state_of(40.0, "jid"), "waiting");
}

#[test]
fn cancel_blocks_while_outside_dependents_exist() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "a");
    broker.put_with(1.0, "queue", "b", &[json!("depends"), json!(["a"])]);
    broker.put_with(2.0, "queue", "c", &[json!("depends"), json!(["b"])]);

    let message = broker.error("job.cancel", &[json!(3), json!("a"), json!("b")]);
    assert!(message.contains("is a dependency"), "{message}");
    // The whole chain cancels together
    broker.run("job.cancel", &[json!(4), json!("a"), json!("b"), json!("c")]);
    assert_eq!(broker.job(5.0, "a"), Value::Null);
    assert_eq!(broker.job(5.0, "c"), Value::Null);
}

#[test]
fn cancel_order_within_the_set_does_not_matter() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "a");
    broker.put_with(1.0, "queue", "b", &[json!("depends"), json!(["a"])]);
    broker.run("job.cancel", &[json!(2), json!("b"), json!("a")]);
    assert_eq!(broker.job(3.0, "a"), Value::Null);
    assert_eq!(broker.job(3.0, "b"), Value::Null);
}

#[test]
fn reput_with_depends_replaces_the_graph() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "a");
    broker.put(1.0, "queue", "b");
    broker.put_with(2.0, "queue", "c", &[json!("depends"), json!(["a"])]);
    broker.put_with(3.0, "queue", "c", &[json!("depends"), json!(["b"])]);
    assert_eq!(broker.job(4.0, "c")["dependencies"], json!(["b"]));
    assert_eq!(broker.job(4.0, "a")["dependents"], json!([]));
    assert_eq!(broker.job(4.0, "b")["dependents"], json!(["c"]));

    // Completing the stale dependency does not unlock c
    broker.pop(5.0, "queue", 10);
    broker.complete(6.0, "a", "queue");
    assert_eq!(broker.pop(7.0, "queue", 10), Vec::<String>::new());
    broker.complete(8.0, "b", "queue");
    assert_eq!(broker.pop(9.0, "queue", 10), vec!["c"]);
}

#[test]
fn dependency_edits_need_the_depends_state() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "jid");
    let message = broker.error("job.addDependency", &[json!(1), json!("jid"), json!("a")]);
    assert!(message.contains("in the depends state"), "{message}");
    let message = broker.error("job.removeDependency", &[json!(1), json!("jid"), json!("a")]);
    assert!(message.contains("in the depends state"), "{message}");
}

#[test]
fn added_dependencies_extend_the_wait() {
    let broker = Broker::new();
    broker.put(0.0, "queue", "a");
    broker.put(1.0, "queue", "b");
    broker.put_with(2.0, "queue", "c", &[json!("depends"), json!(["a"])]);
    broker.run("job.addDependency", &[json!(3), json!("c"), json!("b")]);
    let deps = broker.job(4.0, "c")["dependencies"].clone();
    assert_eq!(deps, json!(["a", "b"]));

    broker.run("job.removeDependency", &[json!(5), json!("c"), json!("a")]);
    broker.run("job.removeDependency", &[json!(6), json!("c"), json!("b")]);
    assert_eq!(broker.state_of(7.0, "c"), "waiting");
}
