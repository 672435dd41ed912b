// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for flowx-core.
//!
//! [`CoreError`] covers everything the engine surfaces: store conflicts,
//! rejected initiation input, exhausted task retries, and failures to record
//! execution markers. Task bodies return the narrower [`TaskError`].

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the orchestration engine.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// A uniqueness constraint rejected the write (duplicate instance id, or a
    /// second start marker for the same task).
    Conflict {
        /// The entity that already exists.
        entity: String,
        /// The key that collided.
        key: String,
    },

    /// Initiation input was rejected before any persistence took place.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A task body failed on its final attempt.
    TaskExecution {
        /// The task that failed.
        task_name: String,
        /// Message of the last attempt's error.
        message: String,
    },

    /// Writing a start or end marker failed; progress state is unreliable.
    MonitoringPersistence {
        /// Which marker was being written (`start`, `end(S)`, `end(F)`).
        phase: String,
        /// Error details.
        details: String,
    },

    /// Instance was not found.
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: String,
    },

    /// The most recent execution record names a task the definition no longer has.
    UnknownResumePoint {
        /// The instance being resumed.
        workflow_id: String,
        /// Task name from the execution record.
        task_name: String,
    },

    /// The engine is shutting down and did not accept or finish the work.
    ShuttingDown,

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "CONFLICT",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::TaskExecution { .. } => "TASK_EXECUTION_FAILED",
            Self::MonitoringPersistence { .. } => "MONITORING_FAILED",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::UnknownResumePoint { .. } => "UNKNOWN_RESUME_POINT",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Build a conflict error.
    pub fn conflict(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conflict {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Build a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Wrap a store error raised while writing an execution marker.
    ///
    /// A conflict keeps its identity so callers can tell a racing resume apart
    /// from a broken store.
    pub fn monitoring(phase: &str, err: CoreError) -> Self {
        match err {
            conflict @ Self::Conflict { .. } => conflict,
            other => Self::MonitoringPersistence {
                phase: phase.to_string(),
                details: other.to_string(),
            },
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { entity, key } => {
                write!(f, "Conflict: {} '{}' already exists", entity, key)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::TaskExecution { task_name, message } => {
                write!(f, "Task [{}] failed: {}", task_name, message)
            }
            Self::MonitoringPersistence { phase, details } => {
                write!(f, "Task({}) monitoring failed: {}", phase, details)
            }
            Self::InstanceNotFound { instance_id } => {
                write!(f, "Instance '{}' not found", instance_id)
            }
            Self::UnknownResumePoint {
                workflow_id,
                task_name,
            } => {
                write!(
                    f,
                    "Cannot resume workflow '{}': task '{}' is not part of the definition",
                    workflow_id, task_name
                )
            }
            Self::ShuttingDown => write!(f, "Work queue is shutting down"),
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

/// Error returned by a task's cleanup or execute step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    /// Create a task error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message, as recorded in the FAILED end marker.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Convert any error into a task error, keeping its message.
    pub fn from_error<E: std::error::Error>(err: E) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(err)
    }
}
