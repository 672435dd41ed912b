// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for flowx-core integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use flowx_core::alert::AlertNotifier;
use flowx_core::config::RetryPolicy;
use flowx_core::instance::{EndState, ExecutionRecord, TaskAttempt, WorkflowInstance};
use flowx_core::persistence::{ExecutionRecordStore, MemoryPersistence};
use flowx_core::processor::Processor;
use flowx_core::{CoreError, Payload, Task, TaskError, WorkflowDefinition};

/// Build a payload from a JSON object literal.
pub fn payload(value: serde_json::Value) -> Payload {
    value
        .as_object()
        .cloned()
        .expect("payload must be a JSON object")
}

/// Identity task that records every input it sees.
pub fn recording_task(name: &str, seen: Arc<Mutex<Vec<(String, Payload)>>>) -> Task {
    let task_name = name.to_string();
    Task::new(name, "records its input").with_execute(move |_ctx, input| {
        let seen = seen.clone();
        let task_name = task_name.clone();
        async move {
            seen.lock().unwrap().push((task_name, input.clone()));
            Ok(input)
        }
    })
}

/// Task that always fails with the given message.
pub fn failing_task(name: &str, message: &'static str) -> Task {
    Task::new(name, "always fails")
        .with_execute(move |_ctx, _input| async move { Err(TaskError::new(message)) })
}

/// [S1, S2, S3] pass-through definition.
pub fn pass_through_definition() -> Arc<WorkflowDefinition> {
    Arc::new(
        WorkflowDefinition::new(
            "Scenario",
            vec![
                Task::new("S1", "first"),
                Task::new("S2", "second"),
                Task::new("S3", "third"),
            ],
        )
        .unwrap(),
    )
}

/// Processor with no backoff between attempts.
pub fn fast_processor(
    definition: Arc<WorkflowDefinition>,
    records: Arc<dyn ExecutionRecordStore>,
) -> Processor {
    Processor::new(definition, records).with_retry(RetryPolicy::new(3, Duration::ZERO))
}

/// Alert notifier that remembers `(workflow_id, error_code)` of every alert.
#[derive(Default)]
pub struct RecordingAlerts {
    pub alerts: Mutex<Vec<(String, &'static str)>>,
}

impl RecordingAlerts {
    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl AlertNotifier for RecordingAlerts {
    async fn send_alert(
        &self,
        instance: &WorkflowInstance,
        error: &CoreError,
    ) -> Result<(), CoreError> {
        self.alerts
            .lock()
            .unwrap()
            .push((instance.id.clone(), error.error_code()));
        Ok(())
    }
}

/// Alert notifier that counts every call and then fails to deliver.
#[derive(Default)]
pub struct UndeliverableAlerts {
    pub calls: Mutex<Vec<String>>,
}

impl UndeliverableAlerts {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AlertNotifier for UndeliverableAlerts {
    async fn send_alert(
        &self,
        instance: &WorkflowInstance,
        _error: &CoreError,
    ) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(instance.id.clone());
        Err(CoreError::DatabaseError {
            operation: "send_alert".to_string(),
            details: "notifier unreachable".to_string(),
        })
    }
}

/// Which marker write [`FailingRecords`] rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Start,
    End,
    /// Only end markers that record a failed task.
    FailedEnd,
}

/// Execution record store that fails one kind of marker write.
pub struct FailingRecords {
    pub inner: Arc<MemoryPersistence>,
    pub fail_on: FailOn,
}

fn store_down() -> CoreError {
    CoreError::DatabaseError {
        operation: "write".to_string(),
        details: "store unavailable".to_string(),
    }
}

#[async_trait]
impl ExecutionRecordStore for FailingRecords {
    async fn record_task_start(
        &self,
        workflow_id: &str,
        task_name: &str,
        input: &Payload,
    ) -> Result<(), CoreError> {
        if self.fail_on == FailOn::Start {
            return Err(store_down());
        }
        self.inner
            .record_task_start(workflow_id, task_name, input)
            .await
    }

    async fn restart_task(
        &self,
        workflow_id: &str,
        task_name: &str,
        input: &Payload,
        expected_version: i32,
    ) -> Result<(), CoreError> {
        if self.fail_on == FailOn::Start {
            return Err(store_down());
        }
        self.inner
            .restart_task(workflow_id, task_name, input, expected_version)
            .await
    }

    async fn record_task_end(
        &self,
        workflow_id: &str,
        task_name: &str,
        end_state: EndState,
        reason: &str,
        duration_secs: i64,
        output: Option<&Payload>,
    ) -> Result<(), CoreError> {
        let fails = match self.fail_on {
            FailOn::Start => false,
            FailOn::End => true,
            FailOn::FailedEnd => end_state == EndState::Failed,
        };
        if fails {
            return Err(store_down());
        }
        self.inner
            .record_task_end(workflow_id, task_name, end_state, reason, duration_secs, output)
            .await
    }

    async fn most_recent_record(
        &self,
        workflow_id: &str,
    ) -> Result<Option<ExecutionRecord>, CoreError> {
        self.inner.most_recent_record(workflow_id).await
    }

    async fn list_records(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, CoreError> {
        self.inner.list_records(workflow_id).await
    }

    async fn record_task_attempt(
        &self,
        workflow_id: &str,
        task_name: &str,
        attempt: u32,
        error: &str,
    ) -> Result<(), CoreError> {
        self.inner
            .record_task_attempt(workflow_id, task_name, attempt, error)
            .await
    }

    async fn list_task_attempts(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Vec<TaskAttempt>, CoreError> {
        self.inner.list_task_attempts(workflow_id, task_name).await
    }
}

/// Poll `check` until it returns true, failing the test after five seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

/// Input used by the end-to-end scenarios.
pub fn scenario_input() -> Payload {
    payload(json!({"n": 3}))
}
