//! Persistence interfaces and backends for flowx-core.
//!
//! The engine depends on two store contracts: [`InstanceStore`] for workflow
//! instances and [`ExecutionRecordStore`] for per-task start/end markers.
//! Backends must provide atomic insert-if-absent on the instance id and on
//! the `(workflow_id, task_name)` record key; the engine relies on those
//! uniqueness checks to detect racing starts and does no locking of its own.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::instance::{EndState, ExecutionRecord, TaskAttempt, WorkflowInstance};
use crate::workflow::Payload;

/// Durable workflow-instance records.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert a new instance. Fails with `Conflict` if the id already exists.
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), CoreError>;

    /// Look up an instance by id.
    async fn get_instance(&self, instance_id: &str)
    -> Result<Option<WorkflowInstance>, CoreError>;

    /// All instances with `is_completed = false`, oldest first.
    async fn list_incomplete(&self) -> Result<Vec<WorkflowInstance>, CoreError>;

    /// Set `is_completed`, `completed_at = now` and `last_task_status`.
    ///
    /// This is the only transition that flips `is_completed`.
    async fn mark_complete(&self, instance_id: &str) -> Result<(), CoreError>;
}

/// Durable per-task execution markers.
#[async_trait]
pub trait ExecutionRecordStore: Send + Sync {
    /// Create the start marker of a task (version 1, no ending).
    ///
    /// Fails with `Conflict` if a record already exists for the key; the
    /// existing record is left untouched.
    async fn record_task_start(
        &self,
        workflow_id: &str,
        task_name: &str,
        input: &Payload,
    ) -> Result<(), CoreError>;

    /// Restart an existing record in place when resuming that same task.
    ///
    /// Clears the ending, replaces the input, bumps the version and makes the
    /// record the most recent one. Applies only if the stored version equals
    /// `expected_version`; otherwise fails with `Conflict`.
    async fn restart_task(
        &self,
        workflow_id: &str,
        task_name: &str,
        input: &Payload,
        expected_version: i32,
    ) -> Result<(), CoreError>;

    /// Write the end marker of a started task. Each start is ended once.
    async fn record_task_end(
        &self,
        workflow_id: &str,
        task_name: &str,
        end_state: EndState,
        reason: &str,
        duration_secs: i64,
        output: Option<&Payload>,
    ) -> Result<(), CoreError>;

    /// The most recently started record of an instance, if any.
    async fn most_recent_record(
        &self,
        workflow_id: &str,
    ) -> Result<Option<ExecutionRecord>, CoreError>;

    /// All records of an instance in start order.
    async fn list_records(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, CoreError>;

    /// Log a failed attempt of a task.
    async fn record_task_attempt(
        &self,
        _workflow_id: &str,
        _task_name: &str,
        _attempt: u32,
        _error: &str,
    ) -> Result<(), CoreError> {
        // Default: no-op (attempt history not kept)
        Ok(())
    }

    /// Failed attempts of a task, oldest first.
    async fn list_task_attempts(
        &self,
        _workflow_id: &str,
        _task_name: &str,
    ) -> Result<Vec<TaskAttempt>, CoreError> {
        // Default: empty list
        Ok(vec![])
    }
}

/// Key used in conflict errors for execution records.
pub(crate) fn record_key(workflow_id: &str, task_name: &str) -> String {
    format!("{}/{}", workflow_id, task_name)
}
