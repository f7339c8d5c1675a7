//! State repository contract and the in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::error::{SagaError, SagaResult};
use crate::messaging::ErrorPayload;
use crate::state::{ReplyOutcome, SagaState, StatePatch};

/// Durable store for saga state rows.
///
/// The engine treats the repository as authoritative and never caches state
/// across message boundaries. Updates must be atomic writes; concurrent
/// replies for the same saga rely on last-writer-wins for non-conflicting
/// fields and on the reply guard for duplicate deliveries.
#[async_trait]
pub trait SagaStateRepository: Send + Sync {
    /// Create a new state row and assign its saga id.
    async fn create(
        &self,
        saga_name: &str,
        properties: HashMap<String, Value>,
    ) -> SagaResult<SagaState>;

    /// Fetch the current row.
    async fn get(&self, saga_id: i64) -> SagaResult<SagaState>;

    /// Set the status label.
    async fn update_status(&self, saga_id: i64, status: &str) -> SagaResult<()>;

    /// Apply a generic patch.
    async fn update(&self, saga_id: i64, patch: StatePatch) -> SagaResult<()>;

    /// Atomically record the failed step, failure time and failure details.
    async fn on_step_failure(
        &self,
        saga_id: i64,
        step_name: &str,
        details: &ErrorPayload,
    ) -> SagaResult<()>;

    /// Record that a reply was processed. Returns `false` when the same
    /// `(saga_id, step, outcome)` reply was already handled, in which case
    /// the caller must drop the duplicate.
    async fn try_mark_reply_handled(
        &self,
        saga_id: i64,
        step_name: &str,
        outcome: ReplyOutcome,
    ) -> SagaResult<bool>;
}

/// In-memory repository used by tests and single-process workers.
#[derive(Default)]
pub struct InMemorySagaRepository {
    rows: Mutex<HashMap<i64, SagaState>>,
    handled_replies: Mutex<HashSet<(i64, String, ReplyOutcome)>>,
    next_id: AtomicI64,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            handled_replies: Mutex::new(HashSet::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn with_row<T>(
        &self,
        saga_id: i64,
        f: impl FnOnce(&mut SagaState) -> T,
    ) -> SagaResult<T> {
        let mut rows = self.rows.lock().expect("saga rows lock poisoned");
        let row = rows
            .get_mut(&saga_id)
            .ok_or(SagaError::SagaNotFound { saga_id })?;
        Ok(f(row))
    }
}

#[async_trait]
impl SagaStateRepository for InMemorySagaRepository {
    async fn create(
        &self,
        saga_name: &str,
        properties: HashMap<String, Value>,
    ) -> SagaResult<SagaState> {
        let saga_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = SagaState::new(saga_id, saga_name);
        state.properties = properties;

        self.rows
            .lock()
            .expect("saga rows lock poisoned")
            .insert(saga_id, state.clone());

        Ok(state)
    }

    async fn get(&self, saga_id: i64) -> SagaResult<SagaState> {
        self.with_row(saga_id, |row| row.clone())
    }

    async fn update_status(&self, saga_id: i64, status: &str) -> SagaResult<()> {
        self.with_row(saga_id, |row| row.status = status.to_string())
    }

    async fn update(&self, saga_id: i64, patch: StatePatch) -> SagaResult<()> {
        self.with_row(saga_id, |row| patch.apply(row))
    }

    async fn on_step_failure(
        &self,
        saga_id: i64,
        step_name: &str,
        details: &ErrorPayload,
    ) -> SagaResult<()> {
        self.with_row(saga_id, |row| {
            row.failed_step = Some(step_name.to_string());
            row.failed_at = Some(Utc::now());
            row.failure_details = Some(details.clone());
        })
    }

    async fn try_mark_reply_handled(
        &self,
        saga_id: i64,
        step_name: &str,
        outcome: ReplyOutcome,
    ) -> SagaResult<bool> {
        let mut handled = self
            .handled_replies
            .lock()
            .expect("handled replies lock poisoned");
        Ok(handled.insert((saga_id, step_name.to_string(), outcome)))
    }
}
