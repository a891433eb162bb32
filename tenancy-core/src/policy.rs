//! Allow-list of resource subtypes a tenant may author.

use serde_json::Value;
use tracing::error;

use crate::error::{Result, TenancyError};

/// System task types tenants may define directly.
pub const ALLOWED_SUBTYPES: &[&str] = &[
    "DECISION",
    "EVENT",
    "HTTP",
    "SUB_WORKFLOW",
    "FORK",
    "FORK_JOIN_DYNAMIC",
    "JOIN",
    "EXCLUSIVE_JOIN",
    "WAIT",
    "DYNAMIC",
    "LAMBDA",
    "TERMINATE",
    "KAFKA_PUBLISH",
    "DO_WHILE",
];

/// Worker-executed task type; the default for a workflow task without `type`.
pub const SIMPLE_TASK: &str = "SIMPLE";

#[inline]
pub fn is_allowed_subtype(subtype: &str) -> bool {
    ALLOWED_SUBTYPES.contains(&subtype)
}

/// Reject a task definition whose `type` is not allow-listed.
///
/// A missing or non-string `type` is rejected as well.
pub fn assert_allowed_subtype(resource: &Value) -> Result<()> {
    let subtype = resource.get("type").and_then(Value::as_str);
    match subtype {
        Some(s) if is_allowed_subtype(s) => Ok(()),
        _ => Err(disallowed(resource, subtype)),
    }
}

/// Reject a task nested in a workflow definition unless it is a worker task
/// or an allow-listed system task.
pub fn assert_allowed_workflow_task(task: &Value) -> Result<()> {
    match task.get("type") {
        None => Ok(()),
        Some(Value::String(s)) if s == SIMPLE_TASK || is_allowed_subtype(s) => Ok(()),
        Some(other) => Err(disallowed(task, other.as_str())),
    }
}

/// The task type, with the backend's default applied.
pub fn task_type(task: &Value) -> &str {
    task.get("type").and_then(Value::as_str).unwrap_or(SIMPLE_TASK)
}

fn disallowed(resource: &Value, subtype: Option<&str>) -> TenancyError {
    error!(resource = %resource, "Task type is not allowed");
    TenancyError::DisallowedSubtype {
        subtype: subtype.map(str::to_owned),
        name: resource
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    }
}
