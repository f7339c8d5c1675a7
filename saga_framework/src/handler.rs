//! Participant-side handler wrappers.
//!
//! A participant hosts one handler per command topic. The wrappers turn a
//! bare `(saga_id, payload) -> response` function into a registrable worker
//! handler that publishes the success-or-failure reply on the saga's
//! response queue under the derived topic names.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::error;

use crate::broker::{MessageBroker, TaskHandler};
use crate::error::SagaResult;
use crate::messaging::{failure_task_name, success_task_name, ErrorPayload};

/// Bare participant command handler. `None` means a success reply with an
/// empty body.
pub type CommandHandler =
    Arc<dyn Fn(i64, Value) -> BoxFuture<'static, SagaResult<Option<Value>>> + Send + Sync>;

/// Lift a plain async fn into a [`CommandHandler`].
pub fn command_handler<F, Fut>(f: F) -> CommandHandler
where
    F: Fn(i64, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SagaResult<Option<Value>>> + Send + 'static,
{
    Arc::new(move |saga_id, payload| Box::pin(f(saga_id, payload)))
}

/// Bounded fixed-delay retry, applied before the failure reply is published.
///
/// Retries are the participant's responsibility and invisible to the
/// orchestrator; the wrapped handler must be idempotent.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

/// Wrap a handler so that its return value is published under
/// `{base}.response.success` and any error is serialized into an
/// [`ErrorPayload`] and published under `{base}.response.failure`.
pub fn saga_step_handler(
    broker: Arc<dyn MessageBroker>,
    base_task_name: &str,
    response_queue: &str,
    handler: CommandHandler,
) -> TaskHandler {
    let base_task_name = base_task_name.to_string();
    let response_queue = response_queue.to_string();

    Arc::new(move |saga_id, payload| {
        let broker = broker.clone();
        let handler = handler.clone();
        let base_task_name = base_task_name.clone();
        let response_queue = response_queue.clone();

        Box::pin(async move {
            let outcome = handler(saga_id, payload).await;
            publish_outcome(&*broker, &base_task_name, &response_queue, saga_id, outcome).await
        })
    })
}

/// [`saga_step_handler`] with a bounded retry around the handler body. The
/// failure reply is published only after the last attempt fails.
pub fn saga_step_handler_with_retry(
    broker: Arc<dyn MessageBroker>,
    base_task_name: &str,
    response_queue: &str,
    policy: RetryPolicy,
    handler: CommandHandler,
) -> TaskHandler {
    let base_task_name = base_task_name.to_string();
    let response_queue = response_queue.to_string();

    Arc::new(move |saga_id, payload| {
        let broker = broker.clone();
        let handler = handler.clone();
        let base_task_name = base_task_name.clone();
        let response_queue = response_queue.clone();

        Box::pin(async move {
            let strategy = FixedInterval::new(policy.delay).take(policy.max_retries);
            let outcome =
                Retry::spawn(strategy, || handler(saga_id, payload.clone())).await;
            publish_outcome(&*broker, &base_task_name, &response_queue, saga_id, outcome).await
        })
    })
}

/// Wrapper for handlers that implement a compensation: no reply is ever
/// published, and errors are logged. The orchestrator does not wait for
/// compensation outcomes.
pub fn compensation_step_handler(base_task_name: &str, handler: CommandHandler) -> TaskHandler {
    let base_task_name = base_task_name.to_string();

    Arc::new(move |saga_id, payload| {
        let handler = handler.clone();
        let base_task_name = base_task_name.clone();

        Box::pin(async move {
            if let Err(err) = handler(saga_id, payload).await {
                error!(
                    saga_id,
                    task = %base_task_name,
                    error = %err,
                    "compensation handler failed"
                );
            }
            Ok(())
        })
    })
}

async fn publish_outcome(
    broker: &dyn MessageBroker,
    base_task_name: &str,
    response_queue: &str,
    saga_id: i64,
    outcome: SagaResult<Option<Value>>,
) -> SagaResult<()> {
    match outcome {
        Ok(response) => {
            let payload = response.unwrap_or(Value::Null);
            broker
                .send_task(
                    response_queue,
                    &success_task_name(base_task_name),
                    saga_id,
                    &payload,
                )
                .await?;
        }
        Err(err) => {
            error!(saga_id, task = base_task_name, error = %err, "command handler failed");
            let payload = ErrorPayload::from_error(&err).to_value();
            broker
                .send_task(
                    response_queue,
                    &failure_task_name(base_task_name),
                    saga_id,
                    &payload,
                )
                .await?;
        }
    }

    Ok(())
}
