//! Broker abstraction: named queues, structured payloads, broker-assigned
//! message ids and handler subscription by task name.

mod memory;
mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::SagaResult;

pub use self::memory::{InMemoryBroker, PublishedMessage};
pub use self::redis::RedisBroker;

/// Handler subscribed under a task name. Receives the `(saga_id, payload)`
/// pair of an arrived message.
pub type TaskHandler =
    Arc<dyn Fn(i64, Value) -> BoxFuture<'static, SagaResult<()>> + Send + Sync>;

/// Minimal broker contract the engine depends on.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish `(saga_id, payload)` to `queue` under `task_name`. Returns
    /// the broker-assigned message id.
    async fn send_task(
        &self,
        queue: &str,
        task_name: &str,
        saga_id: i64,
        payload: &Value,
    ) -> SagaResult<String>;

    /// Register a handler for messages carrying `task_name`.
    async fn subscribe(&self, task_name: &str, handler: TaskHandler) -> SagaResult<()>;

    /// Worker loop: pop messages from `queue` and dispatch them to the
    /// subscribed handlers.
    async fn consume(&self, queue: &str) -> SagaResult<()>;
}
