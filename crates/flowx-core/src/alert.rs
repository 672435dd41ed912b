// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Alerting on instance-level terminal failures.
//!
//! The work queue calls an [`AlertNotifier`] once per failed `start_workflow`.
//! Notifier failures are logged by the caller and never escalated.

use async_trait::async_trait;
use tracing::error;

use crate::error::CoreError;
use crate::instance::WorkflowInstance;

/// Best-effort external notification channel.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Report that `instance` stopped on `error`.
    async fn send_alert(
        &self,
        instance: &WorkflowInstance,
        error: &CoreError,
    ) -> Result<(), CoreError>;
}

/// Notifier that emits an `error!` event instead of calling out.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertNotifier;

#[async_trait]
impl AlertNotifier for TracingAlertNotifier {
    async fn send_alert(
        &self,
        instance: &WorkflowInstance,
        error: &CoreError,
    ) -> Result<(), CoreError> {
        error!(
            workflow_id = %instance.id,
            error_code = error.error_code(),
            error = %error,
            "Workflow stopped, instance left incomplete"
        );
        Ok(())
    }
}
