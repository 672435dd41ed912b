// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow definitions and their tasks.
//!
//! A [`WorkflowDefinition`] is a named, ordered list of [`Task`]s. Tasks run
//! strictly in order; each task receives the previous task's output as its
//! input. A task may carry a cleanup step, an execute step, both, or neither:
//!
//! | cleanup | execute | behaviour |
//! |---------|---------|-----------|
//! | -       | -       | input passes through unchanged |
//! | -       | yes     | output of execute |
//! | yes     | -       | cleanup runs, input passes through |
//! | yes     | yes     | cleanup runs first, then execute |
//!
//! Cleanup runs before execute on every attempt, including retries.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::{CoreError, TaskError};

/// Dynamically typed key/value payload threaded from task to task.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Async cleanup step of a task.
pub type CleanupFn =
    Arc<dyn Fn(TaskContext, Payload) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Async execute step of a task.
pub type ExecuteFn = Arc<
    dyn Fn(TaskContext, Payload) -> BoxFuture<'static, Result<Payload, TaskError>> + Send + Sync,
>;

/// Context handed to a task's cleanup and execute steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    /// Instance the task runs for.
    pub workflow_id: String,
    /// Name of the running task.
    pub task_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// One step of a workflow.
#[derive(Clone)]
pub struct Task {
    /// Unique name within the definition; part of the execution record key.
    pub name: String,
    /// Human readable description.
    pub description: String,
    cleanup: Option<CleanupFn>,
    execute: Option<ExecuteFn>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("cleanup", &self.cleanup.as_ref().map(|_| "..."))
            .field("execute", &self.execute.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Task {
    /// Create a pass-through task with no cleanup or execute step.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            cleanup: None,
            execute: None,
        }
    }

    /// Attach a cleanup step, run before execute on every attempt.
    pub fn with_cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: Fn(TaskContext, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.cleanup = Some(Arc::new(move |ctx, input| cleanup(ctx, input).boxed()));
        self
    }

    /// Attach an execute step producing the task's output.
    pub fn with_execute<F, Fut>(mut self, execute: F) -> Self
    where
        F: Fn(TaskContext, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, TaskError>> + Send + 'static,
    {
        self.execute = Some(Arc::new(move |ctx, input| execute(ctx, input).boxed()));
        self
    }

    /// Whether the task has a cleanup step.
    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Whether the task has an execute step.
    pub fn has_execute(&self) -> bool {
        self.execute.is_some()
    }

    /// Run one attempt: cleanup (if any), then execute (if any).
    ///
    /// Without an execute step the input is returned unchanged.
    pub async fn run(&self, ctx: TaskContext, input: Payload) -> Result<Payload, TaskError> {
        if let Some(cleanup) = &self.cleanup {
            cleanup(ctx.clone(), input.clone()).await?;
        }

        match &self.execute {
            Some(execute) => execute(ctx, input).await,
            None => Ok(input),
        }
    }
}

/// Named, ordered list of tasks describing one workflow type.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    tasks: Vec<Task>,
}

impl WorkflowDefinition {
    /// Create a definition. Task names must be non-empty and unique.
    pub fn new(name: impl Into<String>, tasks: Vec<Task>) -> Result<Self, CoreError> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if task.name.is_empty() {
                return Err(CoreError::validation("task.name", "cannot be empty"));
            }
            if !seen.insert(task.name.as_str()) {
                return Err(CoreError::validation(
                    "task.name",
                    format!("duplicate task name '{}'", task.name),
                ));
            }
        }

        Ok(Self {
            name: name.into(),
            tasks,
        })
    }

    /// Definition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full task list, in definition order.
    pub fn all_tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks still to run after `last_task` ended.
    ///
    /// A failed (or unfinished) `last_task` is included so it reruns from
    /// scratch; a successful one is skipped. Unknown names yield an empty slice.
    pub fn pending_tasks(&self, last_task: &str, last_task_succeeded: bool) -> &[Task] {
        match self.tasks.iter().position(|t| t.name == last_task) {
            Some(idx) if last_task_succeeded => &self.tasks[idx + 1..],
            Some(idx) => &self.tasks[idx..],
            None => &[],
        }
    }

    /// Whether a task with this name is part of the definition.
    pub fn contains_task(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t.name == name)
    }

    /// Names of all tasks, in order.
    pub fn task_names(&self) -> Vec<&str> {
        task_names(&self.tasks)
    }
}

/// Names of the given tasks, in order.
pub fn task_names(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.name.as_str()).collect()
}
