//! Persisted per-saga state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messaging::ErrorPayload;

/// Status label a saga state row starts with.
pub const INITIAL_STATUS: &str = "not_started";

/// Durable record of a saga instance's progress.
///
/// The engine reads this row on every reply; the worker that dispatched a
/// command keeps no in-memory continuation. The row outlives the saga for
/// audit and is never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState {
    /// Primary key and correlation id of every message the saga exchanges
    pub saga_id: i64,

    /// Saga type name, used to rebuild the saga object on replies
    pub saga_name: String,

    /// Free-form status label chosen by the concrete saga
    pub status: String,

    /// Most recent outbound broker message id
    pub last_message_id: Option<String>,

    /// Name of the step whose action or reply failed
    pub failed_step: Option<String>,

    /// When the failure was recorded
    pub failed_at: Option<DateTime<Utc>>,

    /// The failure reply body, exactly as received
    pub failure_details: Option<ErrorPayload>,

    /// Application fields, e.g. the business entity id the saga operates on
    pub properties: HashMap<String, Value>,
}

impl SagaState {
    pub fn new(saga_id: i64, saga_name: impl Into<String>) -> Self {
        Self {
            saga_id,
            saga_name: saga_name.into(),
            status: INITIAL_STATUS.to_string(),
            last_message_id: None,
            failed_step: None,
            failed_at: None,
            failure_details: None,
            properties: HashMap::new(),
        }
    }

    /// Fetch an application property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Fetch an application property expected to be an integer id.
    pub fn property_i64(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(Value::as_i64)
    }
}

/// Generic patch applied through [`crate::repository::SagaStateRepository::update`].
#[derive(Debug, Default, Clone)]
pub struct StatePatch {
    pub status: Option<String>,
    pub last_message_id: Option<Option<String>>,
    pub properties: HashMap<String, Value>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_last_message_id(mut self, message_id: Option<String>) -> Self {
        self.last_message_id = Some(message_id);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Apply this patch to a state row in place.
    pub fn apply(self, state: &mut SagaState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(message_id) = self.last_message_id {
            state.last_message_id = message_id;
        }
        state.properties.extend(self.properties);
    }
}

/// Which reply topic a processed reply arrived on.
///
/// Together with `(saga_id, step_name)` this keys the duplicate-delivery
/// guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyOutcome {
    Success,
    Failure,
}

impl ReplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyOutcome::Success => "success",
            ReplyOutcome::Failure => "failure",
        }
    }
}
