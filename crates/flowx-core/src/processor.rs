// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resumable workflow execution.
//!
//! The processor keeps no state of its own between calls. Where an instance
//! stands is recovered from the execution record store on every
//! [`Processor::start_workflow`]:
//!
//! - no record: run every task with the instance input
//! - last record COMPLETED: run the tasks after it with its output
//! - last record FAILED or open: rerun that task with the input it started with
//!
//! Each task gets a start marker before its first attempt and an end marker
//! once its retry loop concludes. Marker writes are never retried.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, info_span, instrument, warn};

use crate::config::RetryPolicy;
use crate::error::{CoreError, Result, TaskError};
use crate::instance::{EndState, WorkflowInstance};
use crate::persistence::ExecutionRecordStore;
use crate::workflow::{Payload, Task, TaskContext, WorkflowDefinition};

/// How the start marker of a task is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMarker {
    /// Insert a new record; a record already present is a `Conflict`.
    Fresh,
    /// Restart the existing record of a resumed task, guarded by its version.
    Restart {
        /// Version read from the most recent record.
        version: i32,
    },
}

/// Where a workflow instance picks up.
#[derive(Debug)]
pub struct ResumePoint<'a> {
    /// Tasks still to run, in order.
    pub tasks: &'a [Task],
    /// Input for the first pending task.
    pub input: Payload,
    /// How the first pending task's start marker is written.
    pub first_marker: StartMarker,
}

/// Runs the tasks of one workflow definition for any number of instances.
pub struct Processor {
    definition: Arc<WorkflowDefinition>,
    records: Arc<dyn ExecutionRecordStore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    span: Span,
}

impl Processor {
    /// Create a processor with the default retry policy.
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        records: Arc<dyn ExecutionRecordStore>,
    ) -> Self {
        let span = info_span!("processor", workflow = %definition.name());
        Self {
            definition,
            records,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            span,
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share a cancellation token. It interrupts the backoff between attempts.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Parent span for every workflow run of this processor.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The definition this processor runs.
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// The cancellation token observed between attempts.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run (or resume) an instance until every pending task succeeded.
    ///
    /// Returns the output of the last task. Stops at the first task whose
    /// attempts are exhausted, without touching the tasks after it.
    #[instrument(
        name = "workflow",
        parent = &self.span,
        skip(self, instance),
        fields(workflow_id = %instance.id)
    )]
    pub async fn start_workflow(
        &self,
        worker_id: usize,
        instance: &WorkflowInstance,
    ) -> Result<Payload> {
        let resume = self.resume_point(instance).await?;

        if resume.tasks.is_empty() {
            debug!("No pending tasks, nothing to run");
            return Ok(resume.input);
        }

        info!(
            pending = resume.tasks.len(),
            first_task = %resume.tasks[0].name,
            "Processing workflow"
        );

        self.process_workflow(instance, resume.tasks, resume.input, resume.first_marker)
            .await
    }

    /// Work out the pending tasks and their input from the most recent record.
    pub async fn resume_point(&self, instance: &WorkflowInstance) -> Result<ResumePoint<'_>> {
        let Some(record) = self.records.most_recent_record(&instance.id).await? else {
            return Ok(ResumePoint {
                tasks: self.definition.all_tasks(),
                input: instance.input.clone(),
                first_marker: StartMarker::Fresh,
            });
        };

        if !self.definition.contains_task(&record.task_name) {
            return Err(CoreError::UnknownResumePoint {
                workflow_id: instance.id.clone(),
                task_name: record.task_name,
            });
        }

        let succeeded = record.is_ended_successfully();
        let tasks = self.definition.pending_tasks(&record.task_name, succeeded);
        debug!(
            last_task = %record.task_name,
            succeeded,
            version = record.version,
            "Resuming from execution record"
        );

        if succeeded {
            let input = record
                .ending
                .and_then(|ending| ending.output)
                .unwrap_or_default();
            Ok(ResumePoint {
                tasks,
                input,
                first_marker: StartMarker::Fresh,
            })
        } else {
            Ok(ResumePoint {
                tasks,
                input: record.input,
                first_marker: StartMarker::Restart {
                    version: record.version,
                },
            })
        }
    }

    /// Run `tasks` strictly in order, threading each output into the next input.
    pub async fn process_workflow(
        &self,
        instance: &WorkflowInstance,
        tasks: &[Task],
        input: Payload,
        first_marker: StartMarker,
    ) -> Result<Payload> {
        let mut payload = input;
        let mut marker = first_marker;

        for task in tasks {
            payload = self
                .process_task_with_retry(instance, task, payload, marker)
                .await?;
            marker = StartMarker::Fresh;
        }

        Ok(payload)
    }

    /// Record the start marker, then attempt the task until it succeeds or
    /// the retry policy is exhausted.
    #[instrument(skip(self, instance, task, input), fields(task = %task.name))]
    pub async fn process_task_with_retry(
        &self,
        instance: &WorkflowInstance,
        task: &Task,
        input: Payload,
        marker: StartMarker,
    ) -> Result<Payload> {
        let started = match marker {
            StartMarker::Fresh => {
                self.records
                    .record_task_start(&instance.id, &task.name, &input)
                    .await
            }
            StartMarker::Restart { version } => {
                self.records
                    .restart_task(&instance.id, &task.name, &input, version)
                    .await
            }
        };
        started.map_err(|e| CoreError::monitoring("start", e))?;

        let max_attempts = self.retry.max_attempts;
        let mut attempt = 1;

        loop {
            let ctx = TaskContext {
                workflow_id: instance.id.clone(),
                task_name: task.name.clone(),
                attempt,
            };

            match self.process_task(task, ctx, input.clone()).await {
                Ok((output, duration_secs)) => {
                    self.records
                        .record_task_end(
                            &instance.id,
                            &task.name,
                            EndState::Completed,
                            "",
                            duration_secs,
                            Some(&output),
                        )
                        .await
                        .map_err(|e| CoreError::monitoring("end(S)", e))?;

                    info!(attempt, duration_secs, "Task completed");
                    return Ok(output);
                }
                Err(err) => {
                    warn!(attempt, max_attempts, error = %err, "Task attempt failed");

                    if let Err(e) = self
                        .records
                        .record_task_attempt(&instance.id, &task.name, attempt, err.message())
                        .await
                    {
                        warn!(error = %e, "Failed to record task attempt");
                    }

                    if attempt >= max_attempts {
                        self.records
                            .record_task_end(
                                &instance.id,
                                &task.name,
                                EndState::Failed,
                                err.message(),
                                -1,
                                None,
                            )
                            .await
                            .map_err(|e| CoreError::monitoring("end(F)", e))?;

                        error!(attempts = attempt, error = %err, "Task failed, retries exhausted");
                        return Err(CoreError::TaskExecution {
                            task_name: task.name.clone(),
                            message: err.message().to_string(),
                        });
                    }

                    tokio::select! {
                        biased;

                        _ = self.cancel.cancelled() => {
                            info!(attempt, "Shutdown requested during retry backoff");
                            return Err(CoreError::ShuttingDown);
                        }

                        _ = tokio::time::sleep(self.retry.backoff) => {}
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// One attempt of a task. Returns the output and the whole seconds it took.
    pub async fn process_task(
        &self,
        task: &Task,
        ctx: TaskContext,
        input: Payload,
    ) -> std::result::Result<(Payload, i64), TaskError> {
        let started = Instant::now();
        let output = task.run(ctx, input).await?;
        let duration_secs = i64::try_from(started.elapsed().as_secs()).unwrap_or(i64::MAX);
        Ok((output, duration_secs))
    }
}
