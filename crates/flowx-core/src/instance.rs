// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow instances and the execution records that track their progress.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::Payload;

/// One concrete run of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Globally unique id, assigned at creation.
    pub id: String,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// Input handed to the first task.
    pub input: Payload,
    /// Set once every task has succeeded.
    pub is_completed: bool,
    /// When the instance completed (`None` while incomplete).
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the last task ended successfully.
    pub last_task_status: bool,
}

impl WorkflowInstance {
    /// Create a fresh, incomplete instance with a new UUID.
    pub fn new(input: Payload) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), input)
    }

    /// Create a fresh, incomplete instance with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, input: Payload) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            input,
            is_completed: false,
            completed_at: None,
            last_task_status: false,
        }
    }
}

/// Terminal state of a task's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndState {
    /// An attempt succeeded.
    Completed,
    /// Every attempt failed.
    Failed,
}

impl EndState {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for EndState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown end state '{}'", other)),
        }
    }
}

/// End marker of a task, written once its retry loop concludes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnding {
    /// COMPLETED or FAILED.
    pub end_state: EndState,
    /// Last error message for FAILED, empty for COMPLETED.
    pub reason: String,
    /// When the marker was written.
    pub ended_at: DateTime<Utc>,
    /// Task output (only for COMPLETED).
    pub output: Option<Payload>,
    /// Whole seconds of the successful attempt, `-1` when not timed.
    pub duration_secs: i64,
}

/// Durable start/end marker of one task for one instance.
///
/// Keyed by `(workflow_id, task_name)`; at most one record exists per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Instance the task belongs to.
    pub workflow_id: String,
    /// Task name.
    pub task_name: String,
    /// Bumped each time the task is restarted on resume.
    pub version: i32,
    /// When the task (last) started.
    pub created_at: DateTime<Utc>,
    /// Input the task started with.
    pub input: Payload,
    /// End marker, absent while the task is running or was interrupted.
    pub ending: Option<TaskEnding>,
}

impl ExecutionRecord {
    /// Whether the task ended with COMPLETED.
    pub fn is_ended_successfully(&self) -> bool {
        self.ending
            .as_ref()
            .is_some_and(|e| e.end_state == EndState::Completed)
    }
}

/// One failed attempt of a task, kept for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttempt {
    /// Instance the task belongs to.
    pub workflow_id: String,
    /// Task name.
    pub task_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Error returned by the attempt.
    pub error: String,
    /// When the failure was recorded.
    pub created_at: DateTime<Utc>,
}
