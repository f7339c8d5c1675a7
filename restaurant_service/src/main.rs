//! Restaurant service worker: hosts the ticket command handlers.
//!
//! `create_ticket` and `approve_ticket` reply through the standard wrapper;
//! `reject_ticket` is a compensation command and never replies.
//! `approve_ticket` is deliberately flaky and wrapped in a bounded retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use order_messaging::restaurant_service::{
    approve_ticket, create_ticket, reject_ticket, COMMANDS_QUEUE,
};
use order_messaging::CREATE_ORDER_SAGA_RESPONSE_QUEUE;
use saga_framework::{
    command_handler, compensation_step_handler, saga_step_handler, saga_step_handler_with_retry,
    MessageBroker, RedisBroker, RetryPolicy, SagaError, SagaResult, Settings,
};

/// Fraction of approve-ticket calls that fail transiently.
const APPROVE_FLAKINESS: f64 = 0.3;

const APPROVE_MAX_RETRIES: usize = 2;
const APPROVE_RETRY_DELAY: Duration = Duration::from_secs(5);

async fn create_ticket_task(saga_id: i64, payload: Value) -> SagaResult<Option<Value>> {
    let request: create_ticket::Payload = serde_json::from_value(payload)?;

    // A real service would create the ticket row here; the demo fakes an id.
    let ticket_id = rand::thread_rng().gen_range(200..300);
    info!(
        saga_id,
        order_id = request.order_id,
        ticket_id,
        items = request.items.len(),
        "restaurant ticket created"
    );

    Ok(Some(serde_json::to_value(create_ticket::Response {
        ticket_id,
    })?))
}

async fn reject_ticket_task(saga_id: i64, payload: Value) -> SagaResult<Option<Value>> {
    let request: reject_ticket::Payload = serde_json::from_value(payload)?;
    info!(saga_id, ticket_id = request.ticket_id, "restaurant ticket rejected");
    Ok(None)
}

async fn approve_ticket_task(saga_id: i64, payload: Value) -> SagaResult<Option<Value>> {
    let request: approve_ticket::Payload = serde_json::from_value(payload)?;

    if rand::thread_rng().gen_bool(APPROVE_FLAKINESS) {
        return Err(SagaError::Generic {
            message: "transient approval failure, task will retry".to_string(),
        });
    }

    info!(saga_id, ticket_id = request.ticket_id, "restaurant ticket approved");
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load()?;
    let broker: Arc<dyn MessageBroker> = Arc::new(RedisBroker::connect(&settings.broker_url).await?);

    broker
        .subscribe(
            create_ticket::TASK_NAME,
            saga_step_handler(
                broker.clone(),
                create_ticket::TASK_NAME,
                CREATE_ORDER_SAGA_RESPONSE_QUEUE,
                command_handler(create_ticket_task),
            ),
        )
        .await?;

    broker
        .subscribe(
            reject_ticket::TASK_NAME,
            compensation_step_handler(
                reject_ticket::TASK_NAME,
                command_handler(reject_ticket_task),
            ),
        )
        .await?;

    broker
        .subscribe(
            approve_ticket::TASK_NAME,
            saga_step_handler_with_retry(
                broker.clone(),
                approve_ticket::TASK_NAME,
                CREATE_ORDER_SAGA_RESPONSE_QUEUE,
                RetryPolicy::new(APPROVE_MAX_RETRIES, APPROVE_RETRY_DELAY),
                command_handler(approve_ticket_task),
            ),
        )
        .await?;

    info!(queue = COMMANDS_QUEUE, "restaurant service worker listening");
    broker.consume(COMMANDS_QUEUE).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_ticket_returns_ticket_id() {
        let response = create_ticket_task(
            1,
            json!({
                "order_id": 1,
                "customer_id": 70,
                "items": [{"name": "pelmeni", "quantity": 2}]
            }),
        )
        .await
        .unwrap()
        .unwrap();

        let response: create_ticket::Response = serde_json::from_value(response).unwrap();
        assert!((200..300).contains(&response.ticket_id));
    }

    #[tokio::test]
    async fn test_reject_ticket_returns_nothing() {
        let response = reject_ticket_task(1, json!({"ticket_id": 250})).await.unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_reject_ticket_wrapper_never_replies() {
        use saga_framework::InMemoryBroker;

        let broker = Arc::new(InMemoryBroker::new());
        let handler = compensation_step_handler(
            reject_ticket::TASK_NAME,
            command_handler(reject_ticket_task),
        );

        handler(1, json!({"ticket_id": 250})).await.unwrap();
        assert!(broker.published().is_empty());
    }
}
