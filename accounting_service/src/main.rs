//! Accounting service worker: hosts the authorize-card command handler.

use std::sync::Arc;

use anyhow::Result;
use rand::Rng;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use order_messaging::accounting_service::{authorize_card, COMMANDS_QUEUE};
use order_messaging::CREATE_ORDER_SAGA_RESPONSE_QUEUE;
use saga_framework::{
    command_handler, saga_step_handler, MessageBroker, RedisBroker, SagaError, SagaResult,
    Settings,
};

/// Demo limit: authorizations at or above this amount are declined.
const MAX_AUTHORIZABLE_AMOUNT: i64 = 50;

async fn authorize_card_task(saga_id: i64, payload: Value) -> SagaResult<Option<Value>> {
    let request: authorize_card::Payload = serde_json::from_value(payload)?;
    info!(
        saga_id,
        card_id = request.card_id,
        amount = request.amount,
        "authorizing card"
    );

    if request.amount >= MAX_AUTHORIZABLE_AMOUNT {
        return Err(SagaError::ValidationFailed {
            field: "amount".to_string(),
            message: "Card authorization failed. Insufficient balance".to_string(),
        });
    }

    // A real service would persist the order and transaction ids here.
    let transaction_id = rand::thread_rng().gen_range(100..1000);
    Ok(Some(serde_json::to_value(authorize_card::Response {
        transaction_id,
    })?))
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
            authorize_card::TASK_NAME,
            saga_step_handler(
                broker.clone(),
                authorize_card::TASK_NAME,
                CREATE_ORDER_SAGA_RESPONSE_QUEUE,
                command_handler(authorize_card_task),
            ),
        )
        .await?;

    info!(queue = COMMANDS_QUEUE, "accounting service worker listening");
    broker.consume(COMMANDS_QUEUE).await?;
    Ok(())
}
