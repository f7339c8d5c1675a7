//! Message envelope and reply-topic naming conventions.
//!
//! For a base task name `T` the complete protocol vocabulary of an async
//! step is `T` (command), `T.response.success` and `T.response.failure`
//! (replies). Every message body is the `(saga_id, payload)` pair plus the
//! broker-assigned message id and the topic name used for handler routing.

use std::backtrace::Backtrace;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SagaError;

/// Derive the success reply topic for a base task name.
pub fn success_task_name(task_name: &str) -> String {
    format!("{task_name}.response.success")
}

/// Derive the failure reply topic for a base task name.
pub fn failure_task_name(task_name: &str) -> String {
    format!("{task_name}.response.failure")
}

/// Standard failure reply body.
///
/// Every failure reply on the wire uses this shape, whether it originated
/// in a participant handler or on the orchestrator side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Short error class name
    #[serde(rename = "type")]
    pub error_type: String,

    /// Human-readable message
    pub message: String,

    /// Originating namespace
    pub module: String,

    /// Multi-line diagnostic string
    pub traceback: String,
}

impl ErrorPayload {
    /// Capture a [`SagaError`] into the standard failure structure.
    pub fn from_error(err: &SagaError) -> Self {
        Self {
            error_type: err.error_class().to_string(),
            message: err.to_string(),
            module: module_path!().rsplit_once("::").map_or("saga_framework", |(m, _)| m).to_string(),
            traceback: format!("{err}\n{}", Backtrace::force_capture()),
        }
    }

    /// Decode a failure reply payload leniently.
    ///
    /// Replies that do not parse as an [`ErrorPayload`] are wrapped rather
    /// than dropped, so a malformed participant still fails the saga with
    /// inspectable details.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<ErrorPayload>(value.clone()) {
            Ok(payload) => payload,
            Err(_) => Self {
                error_type: "UnknownError".to_string(),
                message: value.to_string(),
                module: String::new(),
                traceback: String::new(),
            },
        }
    }

    /// Re-encode as a wire payload.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// JSON body stored in a broker queue.
///
/// `task` routes the message to a subscribed handler; `id` is the
/// broker-assigned message id the orchestrator records in
/// `last_message_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub task: String,
    pub saga_id: i64,
    pub payload: Value,
}

impl MessageEnvelope {
    pub fn new(task: &str, saga_id: i64, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.to_string(),
            saga_id,
            payload,
        }
    }
}
