//! Consumer service worker: hosts the verify-consumer-details command
//! handler.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use order_messaging::consumer_service::{verify_consumer_details, COMMANDS_QUEUE};
use order_messaging::CREATE_ORDER_SAGA_RESPONSE_QUEUE;
use saga_framework::{
    command_handler, saga_step_handler, MessageBroker, RedisBroker, SagaError, SagaResult,
    Settings,
};

/// Consumers below this id fail verification, emulating a business rule.
const MIN_VALID_CONSUMER_ID: i64 = 50;

async fn verify_consumer_details_task(saga_id: i64, payload: Value) -> SagaResult<Option<Value>> {
    let request: verify_consumer_details::Payload = serde_json::from_value(payload)?;
    info!(
        saga_id,
        consumer_id = request.consumer_id,
        "verifying consumer details"
    );

    if request.consumer_id < MIN_VALID_CONSUMER_ID {
        return Err(SagaError::ValidationFailed {
            field: "consumer_id".to_string(),
            message: format!("Consumer has incorrect id = {}", request.consumer_id),
        });
    }

    // Nothing to return.
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
            verify_consumer_details::TASK_NAME,
            saga_step_handler(
                broker.clone(),
                verify_consumer_details::TASK_NAME,
                CREATE_ORDER_SAGA_RESPONSE_QUEUE,
                command_handler(verify_consumer_details_task),
            ),
        )
        .await?;

    info!(queue = COMMANDS_QUEUE, "consumer service worker listening");
    broker.consume(COMMANDS_QUEUE).await?;
    Ok(())
}
