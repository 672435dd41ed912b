// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded work queue drained by a fixed pool of workers.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flowx_core::queue::WorkQueue;
//!
//! let queue = WorkQueue::builder()
//!     .instances(store.clone())
//!     .processor(Arc::new(processor))
//!     .queue_size(50)
//!     .workers(5)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! queue.handle().enqueue(instance).await?;
//!
//! // Graceful shutdown
//! queue.shutdown().await?;
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::alert::{AlertNotifier, TracingAlertNotifier};
use crate::config::QueueConfig;
use crate::error::CoreError;
use crate::instance::WorkflowInstance;
use crate::persistence::InstanceStore;
use crate::processor::Processor;

/// Builder for creating a [`WorkQueue`].
pub struct WorkQueueBuilder {
    instances: Option<Arc<dyn InstanceStore>>,
    processor: Option<Arc<Processor>>,
    alerts: Option<Arc<dyn AlertNotifier>>,
    queue: QueueConfig,
    cancel: Option<CancellationToken>,
    span: Option<Span>,
}

impl std::fmt::Debug for WorkQueueBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueueBuilder")
            .field("instances", &self.instances.as_ref().map(|_| "..."))
            .field("processor", &self.processor.as_ref().map(|_| "..."))
            .field("alerts", &self.alerts.as_ref().map(|_| "..."))
            .field("queue", &self.queue)
            .finish()
    }
}

impl Default for WorkQueueBuilder {
    fn default() -> Self {
        Self {
            instances: None,
            processor: None,
            alerts: None,
            queue: QueueConfig::default(),
            cancel: None,
            span: None,
        }
    }
}

impl WorkQueueBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance store (required).
    pub fn instances(mut self, instances: Arc<dyn InstanceStore>) -> Self {
        self.instances = Some(instances);
        self
    }

    /// Set the processor the workers run instances with (required).
    pub fn processor(mut self, processor: Arc<Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Set the alert notifier.
    ///
    /// Default: [`TracingAlertNotifier`]
    pub fn alerts(mut self, alerts: Arc<dyn AlertNotifier>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Set queue capacity and worker count together.
    pub fn config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set the queue capacity.
    ///
    /// Default: `50`
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue.size = size;
        self
    }

    /// Set the number of workers.
    ///
    /// Default: `5`
    pub fn workers(mut self, workers: usize) -> Self {
        self.queue.workers = workers;
        self
    }

    /// Set the token that stops the workers.
    ///
    /// Defaults to the processor's token. [`WorkQueue::shutdown`] cancels both.
    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set the parent span of every worker.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Build the queue configuration.
    ///
    /// Returns an error if required fields are missing or sizes are zero.
    pub fn build(self) -> Result<WorkQueueConfig> {
        let instances = self
            .instances
            .ok_or_else(|| anyhow::anyhow!("instance store is required"))?;
        let processor = self
            .processor
            .ok_or_else(|| anyhow::anyhow!("processor is required"))?;

        if self.queue.size == 0 {
            anyhow::bail!("queue size must be positive");
        }
        if self.queue.workers == 0 {
            anyhow::bail!("worker count must be positive");
        }

        let cancel = self
            .cancel
            .unwrap_or_else(|| processor.cancellation_token().clone());

        Ok(WorkQueueConfig {
            instances,
            processor,
            alerts: self
                .alerts
                .unwrap_or_else(|| Arc::new(TracingAlertNotifier)),
            queue: self.queue,
            cancel,
            span: self
                .span
                .unwrap_or_else(|| info_span!("work_queue")),
        })
    }
}

/// Configuration for a [`WorkQueue`].
pub struct WorkQueueConfig {
    instances: Arc<dyn InstanceStore>,
    processor: Arc<Processor>,
    alerts: Arc<dyn AlertNotifier>,
    queue: QueueConfig,
    cancel: CancellationToken,
    span: Span,
}

impl std::fmt::Debug for WorkQueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueueConfig")
            .field("instances", &"...")
            .field("processor", &"...")
            .field("alerts", &"...")
            .field("queue", &self.queue)
            .finish()
    }
}

/// Shared by every worker.
struct WorkerContext {
    instances: Arc<dyn InstanceStore>,
    processor: Arc<Processor>,
    alerts: Arc<dyn AlertNotifier>,
}

impl WorkQueueConfig {
    /// Spawn the workers, then enqueue every incomplete instance left over
    /// from a previous run.
    ///
    /// Returns once recovery is enqueued; only then is the handle handed out.
    pub async fn start(self) -> Result<WorkQueue> {
        let (sender, receiver) = mpsc::channel(self.queue.size);
        let receiver = Arc::new(Mutex::new(receiver));
        let context = Arc::new(WorkerContext {
            instances: self.instances.clone(),
            processor: self.processor.clone(),
            alerts: self.alerts,
        });

        let workers: Vec<JoinHandle<()>> = (0..self.queue.workers)
            .map(|worker_id| {
                let span = info_span!(parent: &self.span, "worker", worker_id);
                tokio::spawn(
                    run_worker(
                        worker_id,
                        receiver.clone(),
                        context.clone(),
                        self.cancel.clone(),
                    )
                    .instrument(span),
                )
            })
            .collect();

        let queue = WorkQueue {
            handle: QueueHandle {
                sender,
                cancel: self.cancel.clone(),
            },
            workers,
            cancel: self.cancel,
            processor: self.processor,
            recovered: 0,
        };

        let incomplete = match self.instances.list_incomplete().await {
            Ok(incomplete) => incomplete,
            Err(e) => {
                error!(error = %e, "Failed to load incomplete instances");
                queue.shutdown().await?;
                return Err(e.into());
            }
        };

        let mut queue = queue;
        for instance in incomplete {
            debug!(workflow_id = %instance.id, "Recovering incomplete instance");
            queue.handle.enqueue(instance).await?;
            queue.recovered += 1;
        }

        info!(
            queue_size = self.queue.size,
            workers = self.queue.workers,
            recovered = queue.recovered,
            "WorkQueue started"
        );

        Ok(queue)
    }
}

/// Cloneable enqueue side of a running [`WorkQueue`].
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<WorkflowInstance>,
    cancel: CancellationToken,
}

impl QueueHandle {
    /// Put an instance on the queue, waiting while the queue is full.
    ///
    /// Fails with `ShuttingDown` once the queue has been cancelled.
    pub async fn enqueue(&self, instance: WorkflowInstance) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Err(CoreError::ShuttingDown),

            sent = self.sender.send(instance) => sent.map_err(|_| CoreError::ShuttingDown),
        }
    }

    /// Free slots left in the queue.
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

/// A running work queue.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct WorkQueue {
    handle: QueueHandle,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    processor: Arc<Processor>,
    recovered: usize,
}

impl WorkQueue {
    /// Create a new builder for configuring the queue.
    pub fn builder() -> WorkQueueBuilder {
        WorkQueueBuilder::new()
    }

    /// A handle for enqueueing instances.
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Number of incomplete instances enqueued at startup.
    pub fn recovered(&self) -> usize {
        self.recovered
    }

    /// Check if any worker is still running.
    pub fn is_running(&self) -> bool {
        self.workers.iter().any(|w| !w.is_finished())
    }

    /// Stop the workers and wait for all of them to exit.
    ///
    /// Workers finish the task attempt they are running; an instance cut short
    /// between attempts stays incomplete and resumes on the next start.
    pub async fn shutdown(self) -> Result<()> {
        info!("WorkQueue shutting down...");

        self.cancel.cancel();
        self.processor.cancellation_token().cancel();

        let mut panicked = 0;
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Worker task panicked: {}", e);
                panicked += 1;
            }
        }

        if panicked > 0 {
            return Err(anyhow::anyhow!("{} worker task(s) panicked", panicked));
        }

        info!("WorkQueue shutdown complete");
        Ok(())
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WorkflowInstance>>>,
    context: Arc<WorkerContext>,
    cancel: CancellationToken,
) {
    debug!("Worker started");

    loop {
        let next = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,

            next = async { receiver.lock().await.recv().await } => next,
        };

        let Some(instance) = next else {
            break;
        };

        process_instance(worker_id, &instance, &context).await;
    }

    debug!("Worker stopped");
}

/// Run one instance to its outcome: complete it, or alert and leave it incomplete.
async fn process_instance(worker_id: usize, instance: &WorkflowInstance, context: &WorkerContext) {
    match context.processor.start_workflow(worker_id, instance).await {
        Ok(_) => match context.instances.mark_complete(&instance.id).await {
            Ok(()) => info!(workflow_id = %instance.id, "Workflow completed"),
            Err(e) => error!(
                workflow_id = %instance.id,
                error = %e,
                "Failed to mark workflow complete"
            ),
        },
        Err(CoreError::ShuttingDown) => {
            info!(
                workflow_id = %instance.id,
                "Workflow interrupted by shutdown, left for resumption"
            );
        }
        Err(err) => {
            warn!(
                workflow_id = %instance.id,
                error_code = err.error_code(),
                error = %err,
                "Workflow failed"
            );
            if let Err(e) = context.alerts.send_alert(instance, &err).await {
                error!(workflow_id = %instance.id, error = %e, "Failed to send alert");
            }
        }
    }
}
