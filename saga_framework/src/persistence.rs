//! Postgres-backed state repository, enabled by the `database-persistence`
//! feature.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::error::{SagaError, SagaResult};
use crate::messaging::ErrorPayload;
use crate::repository::SagaStateRepository;
use crate::state::{ReplyOutcome, SagaState, StatePatch, INITIAL_STATUS};

const SCHEMA_SAGA_STATES: &str = r#"
CREATE TABLE IF NOT EXISTS saga_states (
    saga_id         BIGSERIAL PRIMARY KEY,
    saga_name       TEXT NOT NULL,
    status          TEXT NOT NULL,
    last_message_id TEXT,
    failed_step     TEXT,
    failed_at       TIMESTAMPTZ,
    failure_details JSONB,
    properties      JSONB NOT NULL DEFAULT '{}'::jsonb
)
"#;

const SCHEMA_HANDLED_REPLIES: &str = r#"
CREATE TABLE IF NOT EXISTS saga_handled_replies (
    saga_id    BIGINT NOT NULL,
    step_name  TEXT NOT NULL,
    outcome    TEXT NOT NULL,
    handled_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (saga_id, step_name, outcome)
)
"#;

/// Repository backed by a Postgres pool. All updates are single-statement
/// atomic writes.
#[derive(Clone)]
pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> SagaResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the saga tables when they do not exist yet.
    pub async fn ensure_schema(&self) -> SagaResult<()> {
        sqlx::query(SCHEMA_SAGA_STATES).execute(&self.pool).await?;
        sqlx::query(SCHEMA_HANDLED_REPLIES)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_state(row: &PgRow) -> SagaResult<SagaState> {
        let failure_details: Option<Value> = row.try_get("failure_details")?;
        let properties: Option<Value> = row.try_get("properties")?;

        Ok(SagaState {
            saga_id: row.try_get("saga_id")?,
            saga_name: row.try_get("saga_name")?,
            status: row.try_get("status")?,
            last_message_id: row.try_get("last_message_id")?,
            failed_step: row.try_get("failed_step")?,
            failed_at: row.try_get::<Option<DateTime<Utc>>, _>("failed_at")?,
            failure_details: failure_details.map(ErrorPayload::from_value),
            properties: properties
                .map(|value| serde_json::from_value(value))
                .transpose()?
                .unwrap_or_default(),
        })
    }

    fn ensure_updated(saga_id: i64, rows_affected: u64) -> SagaResult<()> {
        if rows_affected == 0 {
            Err(SagaError::SagaNotFound { saga_id })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SagaStateRepository for PostgresSagaRepository {
    async fn create(
        &self,
        saga_name: &str,
        properties: HashMap<String, Value>,
    ) -> SagaResult<SagaState> {
        let properties_json = serde_json::to_value(&properties)?;

        let row = sqlx::query(
            "INSERT INTO saga_states (saga_name, status, properties) \
             VALUES ($1, $2, $3) RETURNING saga_id",
        )
        .bind(saga_name)
        .bind(INITIAL_STATUS)
        .bind(&properties_json)
        .fetch_one(&self.pool)
        .await?;

        let saga_id: i64 = row.try_get("saga_id")?;
        let mut state = SagaState::new(saga_id, saga_name);
        state.properties = properties;
        Ok(state)
    }

    async fn get(&self, saga_id: i64) -> SagaResult<SagaState> {
        let row = sqlx::query(
            "SELECT saga_id, saga_name, status, last_message_id, failed_step, \
                    failed_at, failure_details, properties \
             FROM saga_states WHERE saga_id = $1",
        )
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SagaError::SagaNotFound { saga_id })?;

        Self::row_to_state(&row)
    }

    async fn update_status(&self, saga_id: i64, status: &str) -> SagaResult<()> {
        let result = sqlx::query("UPDATE saga_states SET status = $2 WHERE saga_id = $1")
            .bind(saga_id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        Self::ensure_updated(saga_id, result.rows_affected())
    }

    async fn update(&self, saga_id: i64, patch: StatePatch) -> SagaResult<()> {
        let set_message_id = patch.last_message_id.is_some();
        let message_id = patch.last_message_id.flatten();
        let properties_json = serde_json::to_value(&patch.properties)?;

        let result = sqlx::query(
            "UPDATE saga_states SET \
                status = COALESCE($2, status), \
                last_message_id = CASE WHEN $3 THEN $4 ELSE last_message_id END, \
                properties = properties || $5 \
             WHERE saga_id = $1",
        )
        .bind(saga_id)
        .bind(patch.status)
        .bind(set_message_id)
        .bind(message_id)
        .bind(&properties_json)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(saga_id, result.rows_affected())
    }

    async fn on_step_failure(
        &self,
        saga_id: i64,
        step_name: &str,
        details: &ErrorPayload,
    ) -> SagaResult<()> {
        let details_json = serde_json::to_value(details)?;

        let result = sqlx::query(
            "UPDATE saga_states SET \
                failed_step = $2, failed_at = now(), failure_details = $3 \
             WHERE saga_id = $1",
        )
        .bind(saga_id)
        .bind(step_name)
        .bind(&details_json)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(saga_id, result.rows_affected())
    }

    async fn try_mark_reply_handled(
        &self,
        saga_id: i64,
        step_name: &str,
        outcome: ReplyOutcome,
    ) -> SagaResult<bool> {
        let result = sqlx::query(
            "INSERT INTO saga_handled_replies (saga_id, step_name, outcome) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(saga_id)
        .bind(step_name)
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
