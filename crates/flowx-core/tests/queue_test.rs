// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work queue tests: completion, alerting, backpressure, shutdown and recovery.
//!
//! Run with:
//! ```bash
//! cargo test -p flowx-core --test queue_test
//! ```

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;

use flowx_core::config::RetryPolicy;
use flowx_core::initiation::WorkflowInitiator;
use flowx_core::instance::WorkflowInstance;
use flowx_core::persistence::{
    ExecutionRecordStore, InstanceStore, MemoryPersistence, SqlitePersistence,
};
use flowx_core::processor::Processor;
use flowx_core::queue::WorkQueue;
use flowx_core::workflows::{self, BASIC_REQUIRED_FIELDS};
use flowx_core::{Task, TaskError, WorkflowDefinition};

use common::*;

async fn is_completed(store: &dyn InstanceStore, id: &str) -> bool {
    store
        .get_instance(id)
        .await
        .unwrap()
        .is_some_and(|i| i.is_completed)
}

#[tokio::test]
async fn test_successful_instance_is_marked_complete() {
    let store = Arc::new(MemoryPersistence::new());
    let alerts = Arc::new(RecordingAlerts::default());
    let queue = WorkQueue::builder()
        .instances(store.clone())
        .processor(Arc::new(fast_processor(pass_through_definition(), store.clone())))
        .alerts(alerts.clone())
        .workers(2)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let initiator = WorkflowInitiator::new(store.clone(), queue.handle());
    let id = initiator.init_workflow(scenario_input()).await.unwrap();

    wait_until(|| is_completed(&*store, &id)).await;

    let instance = store.get_instance(&id).await.unwrap().unwrap();
    assert!(instance.last_task_status);
    assert!(instance.completed_at.is_some());
    assert_eq!(alerts.count(), 0);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_instance_alerts_once_and_stays_incomplete() {
    let store = Arc::new(MemoryPersistence::new());
    let alerts = Arc::new(RecordingAlerts::default());
    let definition = Arc::new(
        WorkflowDefinition::new(
            "Scenario",
            vec![
                Task::new("S1", ""),
                failing_task("S2", "boom"),
                Task::new("S3", ""),
            ],
        )
        .unwrap(),
    );
    let queue = WorkQueue::builder()
        .instances(store.clone())
        .processor(Arc::new(fast_processor(definition, store.clone())))
        .alerts(alerts.clone())
        .workers(1)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let id = WorkflowInitiator::new(store.clone(), queue.handle())
        .init_workflow(scenario_input())
        .await
        .unwrap();

    wait_until(|| async { alerts.count() == 1 }).await;
    queue.shutdown().await.unwrap();

    let recorded = alerts.alerts.lock().unwrap().clone();
    assert_eq!(recorded, vec![(id.clone(), "TASK_EXECUTION_FAILED")]);

    assert!(!is_completed(&*store, &id).await);
    let names: Vec<String> = store
        .list_records(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.task_name)
        .collect();
    assert_eq!(names, vec!["S1", "S2"]);
}

#[tokio::test]
async fn test_undeliverable_alerts_do_not_stop_workers() {
    let store = Arc::new(MemoryPersistence::new());
    let alerts = Arc::new(UndeliverableAlerts::default());
    let definition = Arc::new(
        WorkflowDefinition::new("Doomed", vec![failing_task("S1", "boom")]).unwrap(),
    );
    let queue = WorkQueue::builder()
        .instances(store.clone())
        .processor(Arc::new(fast_processor(definition, store.clone())))
        .alerts(alerts.clone())
        .workers(1)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let initiator = WorkflowInitiator::new(store.clone(), queue.handle());
    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(initiator.init_workflow(scenario_input()).await.unwrap());
    }

    wait_until(|| async { alerts.count() == 6 }).await;
    assert!(queue.is_running());

    let mut alerted = alerts.calls.lock().unwrap().clone();
    alerted.sort();
    ids.sort();
    assert_eq!(alerted, ids);

    for id in &ids {
        assert!(!is_completed(&*store, id).await);
    }
    assert_eq!(store.list_incomplete().await.unwrap().len(), 6);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recovery_larger_than_queue_capacity() {
    let store = Arc::new(MemoryPersistence::new());
    let instances: Vec<WorkflowInstance> = (0..6)
        .map(|i| WorkflowInstance::new(payload(json!({"i": i}))))
        .collect();
    for instance in &instances {
        store.create_instance(instance).await.unwrap();
    }

    let queue = tokio::time::timeout(
        Duration::from_secs(5),
        WorkQueue::builder()
            .instances(store.clone())
            .processor(Arc::new(fast_processor(pass_through_definition(), store.clone())))
            .queue_size(1)
            .workers(1)
            .build()
            .unwrap()
            .start(),
    )
    .await
    .expect("start did not return with more recovered instances than slots")
    .unwrap();
    assert_eq!(queue.recovered(), 6);

    for instance in &instances {
        let id = instance.id.clone();
        wait_until(|| is_completed(&*store, &id)).await;
    }
    assert!(store.list_incomplete().await.unwrap().is_empty());

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_enqueue_blocks_while_queue_is_full() {
    let store = Arc::new(MemoryPersistence::new());
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(AtomicU32::new(0));

    let task_gate = gate.clone();
    let task_started = started.clone();
    let definition = Arc::new(
        WorkflowDefinition::new(
            "Gated",
            vec![Task::new("Wait", "").with_execute(move |_ctx, input| {
                let gate = task_gate.clone();
                let started = task_started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|e| TaskError::new(e.to_string()))?;
                    Ok(input)
                }
            })],
        )
        .unwrap(),
    );

    let queue = WorkQueue::builder()
        .instances(store.clone())
        .processor(Arc::new(fast_processor(definition, store.clone())))
        .queue_size(1)
        .workers(1)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    let handle = queue.handle();

    let instances: Vec<WorkflowInstance> = (0..3)
        .map(|i| WorkflowInstance::new(payload(json!({"i": i}))))
        .collect();
    for instance in &instances {
        store.create_instance(instance).await.unwrap();
    }

    // The single worker picks up the first instance and blocks inside it.
    handle.enqueue(instances[0].clone()).await.unwrap();
    wait_until(|| async { started.load(Ordering::SeqCst) == 1 }).await;

    // The second fills the only slot.
    handle.enqueue(instances[1].clone()).await.unwrap();
    assert_eq!(handle.available(), 0);

    // The third has to wait.
    let blocked_handle = handle.clone();
    let third = instances[2].clone();
    let blocked = tokio::spawn(async move { blocked_handle.enqueue(third).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished());

    gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("enqueue still blocked after a slot freed")
        .unwrap()
        .unwrap();

    for instance in &instances {
        let id = instance.id.clone();
        wait_until(|| is_completed(&*store, &id)).await;
    }

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_during_backoff_then_recover_on_restart() {
    let store = Arc::new(MemoryPersistence::new());
    let alerts = Arc::new(RecordingAlerts::default());

    let flaky = Arc::new(
        WorkflowDefinition::new("Recoverable", vec![failing_task("S1", "not yet")]).unwrap(),
    );
    let slow = Processor::new(flaky, store.clone())
        .with_retry(RetryPolicy::new(3, Duration::from_secs(3600)));

    let queue = WorkQueue::builder()
        .instances(store.clone())
        .processor(Arc::new(slow))
        .alerts(alerts.clone())
        .workers(1)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let id = WorkflowInitiator::new(store.clone(), queue.handle())
        .init_workflow(scenario_input())
        .await
        .unwrap();

    wait_until(|| async {
        store.list_task_attempts(&id, "S1").await.unwrap().len() == 1
    })
    .await;

    tokio::time::timeout(Duration::from_secs(5), queue.shutdown())
        .await
        .expect("shutdown should interrupt the backoff")
        .unwrap();

    assert_eq!(alerts.count(), 0);
    assert!(!is_completed(&*store, &id).await);
    let open = store.most_recent_record(&id).await.unwrap().unwrap();
    assert!(open.ending.is_none());

    // Next process lifetime: the task works now.
    let healed = Arc::new(
        WorkflowDefinition::new("Recoverable", vec![Task::new("S1", "")]).unwrap(),
    );
    let queue = WorkQueue::builder()
        .instances(store.clone())
        .processor(Arc::new(fast_processor(healed, store.clone())))
        .workers(1)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    assert_eq!(queue.recovered(), 1);

    wait_until(|| is_completed(&*store, &id)).await;
    let record = store.most_recent_record(&id).await.unwrap().unwrap();
    assert_eq!(record.version, 2);
    assert!(record.is_ended_successfully());

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_basic_workflow_on_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqlitePersistence::from_path(dir.path().join("data").join("flowx.db"))
            .await
            .unwrap(),
    );

    let definition = Arc::new(workflows::basic_workflow().unwrap());
    let queue = WorkQueue::builder()
        .instances(store.clone())
        .processor(Arc::new(fast_processor(definition, store.clone())))
        .workers(2)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let initiator = WorkflowInitiator::new(store.clone(), queue.handle())
        .with_required_fields(BASIC_REQUIRED_FIELDS);

    let rejected = initiator.init_workflow(payload(json!({"number": 4}))).await;
    assert_eq!(rejected.unwrap_err().error_code(), "VALIDATION_ERROR");

    let id = initiator
        .init_workflow(payload(json!({"name": "abcd"})))
        .await
        .unwrap();

    wait_until(|| is_completed(&*store, &id)).await;
    queue.shutdown().await.unwrap();

    let records = store.list_records(&id).await.unwrap();
    let names: Vec<&str> = records.iter().map(|r| r.task_name.as_str()).collect();
    assert_eq!(names, vec!["Step 1", "Step 2", "Step 3"]);

    let last = records[2].ending.as_ref().unwrap();
    assert_eq!(last.output, Some(payload(json!({"name": "dabc"}))));
    assert!(store.list_incomplete().await.unwrap().is_empty());
}
