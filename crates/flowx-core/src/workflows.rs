// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in workflow definitions.

use serde_json::Value;
use tracing::info;

use crate::error::{CoreError, TaskError};
use crate::workflow::{Payload, Task, TaskContext, WorkflowDefinition};

/// Name of the three-step name jumbling workflow.
pub const BASIC_WORKFLOW: &str = "Basic-Workflow";

/// Three steps, each jumbling the `name` field of its input.
pub fn basic_workflow() -> Result<WorkflowDefinition, CoreError> {
    let tasks = (1..=3)
        .map(|step| {
            Task::new(
                format!("Step {}", step),
                format!("Step {} in Basic Workflow", step),
            )
            .with_execute(jumble_task)
        })
        .collect();

    WorkflowDefinition::new(BASIC_WORKFLOW, tasks)
}

/// Fields `basic_workflow` requires in its input.
pub const BASIC_REQUIRED_FIELDS: [&str; 1] = ["name"];

/// Move the first character of `name` to the end.
pub fn jumble_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            let mut jumbled: String = chars.collect();
            jumbled.push(first);
            jumbled
        }
        None => String::new(),
    }
}

async fn jumble_task(ctx: TaskContext, input: Payload) -> Result<Payload, TaskError> {
    let name = input.get("name").and_then(Value::as_str).unwrap_or_default();
    let jumbled = jumble_name(name);

    info!(workflow_id = %ctx.workflow_id, name = %jumbled, "Jumbled name");

    let mut output = Payload::new();
    output.insert("name".to_string(), Value::String(jumbled));
    Ok(output)
}
