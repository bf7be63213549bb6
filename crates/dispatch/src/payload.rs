//! Wire payload sent to an engine's run endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use db::TaskRecord;

use crate::DispatchError;

/// `{"task_slug": …, "config": {…}|null, "data": {…}|null}`
///
/// `config` and `data` are passed through from the task input untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub task_slug: String,
    pub config: Option<Value>,
    pub data: Option<Value>,
}

impl DispatchPayload {
    /// Build the payload for `task`.
    ///
    /// # Errors
    /// [`DispatchError::MalformedTaskInput`] when the input is not a JSON
    /// object, or when `config`/`data` is present but neither an object nor null.
    pub fn from_task(task: &TaskRecord) -> Result<Self, DispatchError> {
        if task.slug.trim().is_empty() {
            return Err(DispatchError::MalformedTaskInput(format!("task {} has an empty slug", task.id)));
        }
        let input = task.input.as_object().ok_or_else(|| {
            DispatchError::MalformedTaskInput(format!("task {} input must be a JSON object", task.id))
        })?;

        Ok(Self {
            task_slug: task.slug.clone(),
            config: object_field(input, "config", task)?,
            data: object_field(input, "data", task)?,
        })
    }
}

fn object_field(
    input: &serde_json::Map<String, Value>,
    field: &str,
    task: &TaskRecord,
) -> Result<Option<Value>, DispatchError> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Object(_)) => Ok(Some(v.clone())),
        Some(other) => Err(DispatchError::MalformedTaskInput(format!(
            "task {} field '{field}' must be an object or null, got {other}",
            task.id
        ))),
    }
}
