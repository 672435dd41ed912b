//! In-memory persistence, for tests and embedded use without a database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::CoreError;
use crate::instance::{EndState, ExecutionRecord, TaskAttempt, TaskEnding, WorkflowInstance};
use crate::workflow::Payload;

use super::{ExecutionRecordStore, InstanceStore, record_key};

#[derive(Default)]
struct Inner {
    instances: HashMap<String, WorkflowInstance>,
    records: HashMap<(String, String), (u64, ExecutionRecord)>,
    attempts: Vec<TaskAttempt>,
    next_seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Mutex-guarded maps implementing both store contracts.
#[derive(Default)]
pub struct MemoryPersistence {
    inner: Mutex<Inner>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the maps consistent; keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl InstanceStore for MemoryPersistence {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), CoreError> {
        let mut inner = self.lock();
        if inner.instances.contains_key(&instance.id) {
            return Err(CoreError::conflict("instance", &instance.id));
        }
        inner
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<WorkflowInstance>, CoreError> {
        Ok(self.lock().instances.get(instance_id).cloned())
    }

    async fn list_incomplete(&self) -> Result<Vec<WorkflowInstance>, CoreError> {
        let inner = self.lock();
        let mut incomplete: Vec<WorkflowInstance> = inner
            .instances
            .values()
            .filter(|i| !i.is_completed)
            .cloned()
            .collect();
        incomplete.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(incomplete)
    }

    async fn mark_complete(&self, instance_id: &str) -> Result<(), CoreError> {
        let mut inner = self.lock();
        let instance =
            inner
                .instances
                .get_mut(instance_id)
                .ok_or_else(|| CoreError::InstanceNotFound {
                    instance_id: instance_id.to_string(),
                })?;
        instance.is_completed = true;
        instance.completed_at = Some(Utc::now());
        instance.last_task_status = true;
        Ok(())
    }
}

#[async_trait]
impl ExecutionRecordStore for MemoryPersistence {
    async fn record_task_start(
        &self,
        workflow_id: &str,
        task_name: &str,
        input: &Payload,
    ) -> Result<(), CoreError> {
        let mut inner = self.lock();
        let key = (workflow_id.to_string(), task_name.to_string());
        if inner.records.contains_key(&key) {
            return Err(CoreError::conflict(
                "execution record",
                record_key(workflow_id, task_name),
            ));
        }

        let seq = inner.next_seq();
        let record = ExecutionRecord {
            workflow_id: workflow_id.to_string(),
            task_name: task_name.to_string(),
            version: 1,
            created_at: Utc::now(),
            input: input.clone(),
            ending: None,
        };
        inner.records.insert(key, (seq, record));
        Ok(())
    }

    async fn restart_task(
        &self,
        workflow_id: &str,
        task_name: &str,
        input: &Payload,
        expected_version: i32,
    ) -> Result<(), CoreError> {
        let mut inner = self.lock();
        let seq = inner.next_seq();
        let key = (workflow_id.to_string(), task_name.to_string());

        match inner.records.get_mut(&key) {
            Some((stored_seq, record)) if record.version == expected_version => {
                *stored_seq = seq;
                record.version += 1;
                record.created_at = Utc::now();
                record.input = input.clone();
                record.ending = None;
                Ok(())
            }
            _ => Err(CoreError::conflict(
                "execution record",
                record_key(workflow_id, task_name),
            )),
        }
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
        let mut inner = self.lock();
        let key = (workflow_id.to_string(), task_name.to_string());

        match inner.records.get_mut(&key) {
            Some((_, record)) if record.ending.is_none() => {
                record.ending = Some(TaskEnding {
                    end_state,
                    reason: reason.to_string(),
                    ended_at: Utc::now(),
                    output: output.cloned(),
                    duration_secs,
                });
                Ok(())
            }
            _ => Err(CoreError::DatabaseError {
                operation: "record_task_end".to_string(),
                details: format!(
                    "no open record for '{}'",
                    record_key(workflow_id, task_name)
                ),
            }),
        }
    }

    async fn most_recent_record(
        &self,
        workflow_id: &str,
    ) -> Result<Option<ExecutionRecord>, CoreError> {
        let inner = self.lock();
        Ok(inner
            .records
            .values()
            .filter(|(_, r)| r.workflow_id == workflow_id)
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, r)| r.clone()))
    }

    async fn list_records(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, CoreError> {
        let inner = self.lock();
        let mut records: Vec<&(u64, ExecutionRecord)> = inner
            .records
            .values()
            .filter(|(_, r)| r.workflow_id == workflow_id)
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        Ok(records.into_iter().map(|(_, r)| r.clone()).collect())
    }

    async fn record_task_attempt(
        &self,
        workflow_id: &str,
        task_name: &str,
        attempt: u32,
        error: &str,
    ) -> Result<(), CoreError> {
        self.lock().attempts.push(TaskAttempt {
            workflow_id: workflow_id.to_string(),
            task_name: task_name.to_string(),
            attempt,
            error: error.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_task_attempts(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Vec<TaskAttempt>, CoreError> {
        Ok(self
            .lock()
            .attempts
            .iter()
            .filter(|a| a.workflow_id == workflow_id && a.task_name == task_name)
            .cloned()
            .collect())
    }
}
