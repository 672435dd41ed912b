// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow initiation: validate, persist, then enqueue.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::{CoreError, Result};
use crate::instance::WorkflowInstance;
use crate::persistence::InstanceStore;
use crate::queue::QueueHandle;
use crate::workflow::Payload;

/// Creates workflow instances and hands them to the work queue.
#[derive(Clone)]
pub struct WorkflowInitiator {
    instances: Arc<dyn InstanceStore>,
    queue: QueueHandle,
    required_fields: Vec<String>,
}

impl WorkflowInitiator {
    /// Create an initiator with no required input fields.
    pub fn new(instances: Arc<dyn InstanceStore>, queue: QueueHandle) -> Self {
        Self {
            instances,
            queue,
            required_fields: Vec::new(),
        }
    }

    /// Require these fields to be present and non-empty in every input.
    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Check the input against the required fields.
    pub fn validate(&self, input: &Payload) -> Result<()> {
        for field in &self.required_fields {
            match input.get(field) {
                None | Some(Value::Null) => {
                    return Err(CoreError::validation(field.as_str(), "is required"));
                }
                Some(Value::String(s)) if s.is_empty() => {
                    return Err(CoreError::validation(field.as_str(), "cannot be empty"));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Validate, create and enqueue a new instance. Returns its id.
    ///
    /// Nothing is persisted when validation fails. Execution failures after
    /// this returns are reported through alerts only.
    ///
    /// A `ShuttingDown` error means the instance was stored but not queued.
    /// It runs on the next start, so callers must not retry the request.
    #[instrument(skip(self, input))]
    pub async fn init_workflow(&self, input: Payload) -> Result<String> {
        self.validate(&input)?;

        let instance = WorkflowInstance::new(input);
        self.instances.create_instance(&instance).await?;

        let id = instance.id.clone();
        if let Err(e) = self.queue.enqueue(instance).await {
            warn!(
                workflow_id = %id,
                error = %e,
                "Workflow stored but not queued, deferred to next start"
            );
            return Err(e);
        }

        info!(workflow_id = %id, "Workflow initiated");
        Ok(id)
    }
}
