//! In-process broker used by tests and single-process demos.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{MessageBroker, TaskHandler};
use crate::error::{SagaError, SagaResult};
use crate::messaging::MessageEnvelope;

/// One publish observed by the broker, kept for assertions.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub id: String,
    pub queue: String,
    pub task_name: String,
    pub saga_id: i64,
    pub payload: Value,
}

/// Broker backed by per-queue deques and a full publish log.
///
/// Messages are not dispatched on publish; tests pump them explicitly with
/// [`InMemoryBroker::drain`] or inject replies with
/// [`InMemoryBroker::deliver`], which makes interleavings deterministic.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<MessageEnvelope>>>,
    handlers: Mutex<HashMap<String, TaskHandler>>,
    log: Mutex<Vec<PublishedMessage>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.log.lock().expect("publish log lock poisoned").clone()
    }

    /// Every message published to one queue, in publish order.
    pub fn published_to(&self, queue: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.queue == queue)
            .collect()
    }

    /// Invoke the handler subscribed under `task_name` directly, as if the
    /// message had just been popped from a queue.
    pub async fn deliver(&self, task_name: &str, saga_id: i64, payload: Value) -> SagaResult<()> {
        let handler = self
            .handlers
            .lock()
            .expect("handlers lock poisoned")
            .get(task_name)
            .cloned();

        match handler {
            Some(handler) => handler(saga_id, payload).await,
            None => Err(SagaError::BrokerError {
                operation: "deliver".to_string(),
                reason: format!("no handler subscribed for task '{task_name}'"),
            }),
        }
    }

    /// Pop and dispatch everything currently queued on `queue`. Returns the
    /// number of messages dispatched. Handler errors are logged, not
    /// propagated, matching a real consumer loop.
    pub async fn drain(&self, queue: &str) -> SagaResult<usize> {
        let mut dispatched = 0;

        loop {
            let envelope = {
                let mut queues = self.queues.lock().expect("queues lock poisoned");
                queues.get_mut(queue).and_then(VecDeque::pop_front)
            };
            let Some(envelope) = envelope else {
                return Ok(dispatched);
            };

            let handler = self
                .handlers
                .lock()
                .expect("handlers lock poisoned")
                .get(&envelope.task)
                .cloned();

            match handler {
                Some(handler) => {
                    if let Err(error) = handler(envelope.saga_id, envelope.payload).await {
                        warn!(task = %envelope.task, %error, "message handler failed");
                    }
                    dispatched += 1;
                }
                None => warn!(task = %envelope.task, "no handler for queued message"),
            }
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send_task(
        &self,
        queue: &str,
        task_name: &str,
        saga_id: i64,
        payload: &Value,
    ) -> SagaResult<String> {
        let envelope = MessageEnvelope::new(task_name, saga_id, payload.clone());
        let message_id = envelope.id.clone();

        self.log
            .lock()
            .expect("publish log lock poisoned")
            .push(PublishedMessage {
                id: message_id.clone(),
                queue: queue.to_string(),
                task_name: task_name.to_string(),
                saga_id,
                payload: payload.clone(),
            });

        self.queues
            .lock()
            .expect("queues lock poisoned")
            .entry(queue.to_string())
            .or_default()
            .push_back(envelope);

        Ok(message_id)
    }

    async fn subscribe(&self, task_name: &str, handler: TaskHandler) -> SagaResult<()> {
        self.handlers
            .lock()
            .expect("handlers lock poisoned")
            .insert(task_name.to_string(), handler);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> SagaResult<()> {
        self.drain(queue).await.map(|_| ())
    }
}
