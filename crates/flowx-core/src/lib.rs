// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! flowx Core - Durable Workflow Orchestrator
//!
//! A workflow is a named, ordered list of tasks. Each run of a workflow is a
//! persisted instance; callers create it and hand it to a bounded queue, and
//! a fixed pool of workers executes its tasks in order. Every task leaves a
//! start marker before its first attempt and an end marker once it succeeds
//! or exhausts its retries, so an interrupted or failed instance resumes at
//! the task where it stopped.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  init_workflow   ┌──────────────────┐
//! │ WorkflowInitiator│ ───────────────► │  InstanceStore   │
//! └──────────────────┘                  └──────────────────┘
//!          │ enqueue                             ▲
//!          ▼                                     │ list_incomplete / mark_complete
//! ┌──────────────────┐   recv   ┌──────────────────────────┐
//! │  bounded queue   │ ───────► │   workers (WorkQueue)    │ ──► AlertNotifier
//! └──────────────────┘          └──────────────────────────┘
//!                                        │ start_workflow
//!                                        ▼
//!                               ┌──────────────────┐   markers  ┌──────────────────────┐
//!                               │    Processor     │ ─────────► │ ExecutionRecordStore │
//!                               └──────────────────┘            └──────────────────────┘
//! ```
//!
//! # Resumption
//!
//! | Most recent record | Pending tasks | Input |
//! |--------------------|---------------|-------|
//! | none | all tasks | instance input |
//! | ended COMPLETED | tasks after it | its output |
//! | ended FAILED, or never ended | that task and the rest | its recorded input |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types with stable error codes
//! - [`workflow`]: Workflow definitions and tasks
//! - [`instance`]: Workflow instances and execution records
//! - [`persistence`]: Store contracts with in-memory and SQLite backends
//! - [`alert`]: Failure notification
//! - [`processor`]: Resumable execution with bounded retry
//! - [`queue`]: Bounded queue and worker pool
//! - [`initiation`]: Validated instance creation
//! - [`workflows`]: Built-in workflow definitions

#![deny(missing_docs)]

/// Alert notifier contract and the tracing-backed notifier.
pub mod alert;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for engine operations.
pub mod error;

/// Validated creation and enqueueing of workflow instances.
pub mod initiation;

/// Workflow instance and execution record data model.
pub mod instance;

/// Embedded database migrations.
pub mod migrations;

/// Store contracts and backends.
pub mod persistence;

/// Resumable workflow processor.
pub mod processor;

/// Work queue and worker pool runtime.
pub mod queue;

/// Workflow and task definitions.
pub mod workflow;

/// Built-in workflow definitions.
pub mod workflows;

pub use error::{CoreError, TaskError};
pub use instance::{EndState, ExecutionRecord, WorkflowInstance};
pub use workflow::{Payload, Task, TaskContext, WorkflowDefinition};
