// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! flowx Core - Durable Workflow Orchestrator
//!
//! Runs the built-in Basic-Workflow. Each line on stdin is a JSON object used
//! as the input of one new workflow instance. Instances left incomplete by a
//! previous run are resumed on startup.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

use flowx_core::config::Config;
use flowx_core::initiation::WorkflowInitiator;
use flowx_core::persistence::SqlitePersistence;
use flowx_core::processor::Processor;
use flowx_core::queue::WorkQueue;
use flowx_core::workflow::Payload;
use flowx_core::workflows::{self, BASIC_REQUIRED_FIELDS, BASIC_WORKFLOW};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flowx_core=info".parse()?),
        )
        .init();

    info!("Starting flowx Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        database_url = %config.database_url,
        queue_size = config.queue.size,
        workers = config.queue.workers,
        max_attempts = config.retry.max_attempts,
        backoff_secs = config.retry.backoff.as_secs(),
        "Configuration loaded"
    );

    info!("Opening database and running migrations...");
    let store = Arc::new(SqlitePersistence::from_url(&config.database_url).await?);
    info!("Database ready");

    let definition = Arc::new(workflows::basic_workflow()?);
    let cancel = CancellationToken::new();
    let processor = Processor::new(definition, store.clone())
        .with_retry(config.retry)
        .with_cancellation(cancel.clone())
        .with_span(info_span!("flowx", workflow = BASIC_WORKFLOW));

    let queue = WorkQueue::builder()
        .instances(store.clone())
        .processor(Arc::new(processor))
        .config(config.queue)
        .build()?
        .start()
        .await?;

    let initiator = WorkflowInitiator::new(store.clone(), queue.handle())
        .with_required_fields(BASIC_REQUIRED_FIELDS);
    let ingress = tokio::spawn(read_requests(initiator));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    ingress.abort();
    queue.shutdown().await?;
    store.pool().close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Initiate one workflow per JSON line on stdin until stdin closes.
async fn read_requests(initiator: WorkflowInitiator) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, no further requests accepted");
                break;
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let input: Payload = match serde_json::from_str(line) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "Ignoring request that is not a JSON object");
                continue;
            }
        };

        match initiator.init_workflow(input).await {
            Ok(id) => println!("Created Workflow With ID: {}", id),
            Err(e) => warn!(error_code = e.error_code(), error = %e, "Workflow not initiated"),
        }
    }
}
