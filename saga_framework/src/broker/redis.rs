//! Redis-backed broker: one list per queue, JSON envelopes, `BLPOP`
//! consumer loops.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::{MessageBroker, TaskHandler};
use crate::error::{SagaError, SagaResult};
use crate::messaging::MessageEnvelope;

const POP_TIMEOUT_SECS: f64 = 5.0;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker client shared across sagas. `ConnectionManager` multiplexes a
/// single reconnecting connection, so clones are cheap and concurrency-safe.
pub struct RedisBroker {
    manager: ConnectionManager,
    handlers: RwLock<HashMap<String, TaskHandler>>,
}

impl RedisBroker {
    /// Connect to the broker at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> SagaResult<Self> {
        let client = redis::Client::open(url).map_err(|err| SagaError::BrokerError {
            operation: "connect".to_string(),
            reason: err.to_string(),
        })?;
        let manager = client.get_connection_manager().await?;

        Ok(Self {
            manager,
            handlers: RwLock::new(HashMap::new()),
        })
    }

    async fn dispatch(&self, envelope: MessageEnvelope) {
        let handler = self.handlers.read().await.get(&envelope.task).cloned();

        match handler {
            Some(handler) => {
                if let Err(err) = handler(envelope.saga_id, envelope.payload).await {
                    error!(
                        task = %envelope.task,
                        saga_id = envelope.saga_id,
                        error = %err,
                        "message handler failed"
                    );
                }
            }
            None => warn!(task = %envelope.task, "no handler subscribed for task"),
        }
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn send_task(
        &self,
        queue: &str,
        task_name: &str,
        saga_id: i64,
        payload: &Value,
    ) -> SagaResult<String> {
        let envelope = MessageEnvelope::new(task_name, saga_id, payload.clone());
        let message_id = envelope.id.clone();
        let body = serde_json::to_string(&envelope)?;

        let mut conn = self.manager.clone();
        let _: i64 = conn.rpush(queue, body).await?;

        debug!(queue, task = task_name, saga_id, message_id = %message_id, "task sent");
        Ok(message_id)
    }

    async fn subscribe(&self, task_name: &str, handler: TaskHandler) -> SagaResult<()> {
        self.handlers
            .write()
            .await
            .insert(task_name.to_string(), handler);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> SagaResult<()> {
        loop {
            let mut conn = self.manager.clone();
            let popped: Option<(String, String)> = match conn.blpop(queue, POP_TIMEOUT_SECS).await {
                Ok(popped) => popped,
                Err(err) => {
                    warn!(queue, error = %err, "broker pop failed, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let Some((_, body)) = popped else {
                continue;
            };

            match serde_json::from_str::<MessageEnvelope>(&body) {
                Ok(envelope) => self.dispatch(envelope).await,
                Err(err) => warn!(queue, error = %err, "discarding undecodable message"),
            }
        }
    }
}
