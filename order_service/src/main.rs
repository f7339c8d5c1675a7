//! Create-order saga reply worker.
//!
//! Binds reply handlers for every async step of the registered saga types,
//! then consumes the saga response queue. With `--place-order` it also
//! originates one demo saga before consuming, so a full round trip can be
//! observed against running participant workers.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use order_messaging::CREATE_ORDER_SAGA_RESPONSE_QUEUE;
use order_service::orders::{InMemoryOrderStore, NewOrder, OrderItem, OrderStore};
use order_service::saga::{create_order_saga_descriptor, start_create_order_saga};
use saga_framework::{
    InMemorySagaRepository, MessageBroker, RedisBroker, SagaEngine, SagaRegistry,
    SagaStateRepository, Settings,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load()?;
    info!(broker = %settings.broker_url, "starting create-order saga worker");

    let broker: Arc<dyn MessageBroker> = Arc::new(RedisBroker::connect(&settings.broker_url).await?);
    let repository = build_repository(&settings).await?;
    let orders: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());

    let engine = SagaEngine::new(broker.clone(), repository);

    let mut registry = SagaRegistry::new();
    registry.register(create_order_saga_descriptor(orders.clone()));
    registry.bind_reply_handlers(&engine).await?;

    if std::env::args().any(|arg| arg == "--place-order") {
        let (order, saga_id) =
            start_create_order_saga(&engine, orders.clone(), demo_order()).await?;
        info!(order_id = order.id, saga_id, "demo order placed");
    }

    broker.consume(CREATE_ORDER_SAGA_RESPONSE_QUEUE).await?;
    Ok(())
}

#[cfg(feature = "database-persistence")]
async fn build_repository(settings: &Settings) -> Result<Arc<dyn SagaStateRepository>> {
    use saga_framework::PostgresSagaRepository;

    match settings.database_url.as_deref() {
        Some(url) => {
            let repository = PostgresSagaRepository::connect(url).await?;
            repository.ensure_schema().await?;
            info!("saga state persisted to Postgres");
            Ok(Arc::new(repository))
        }
        None => Ok(Arc::new(InMemorySagaRepository::new())),
    }
}

#[cfg(not(feature = "database-persistence"))]
async fn build_repository(_settings: &Settings) -> Result<Arc<dyn SagaStateRepository>> {
    Ok(Arc::new(InMemorySagaRepository::new()))
}

/// Order that passes every participant's demo validation.
fn demo_order() -> NewOrder {
    NewOrder {
        consumer_id: 70,
        card_id: 3,
        price: 20,
        items: vec![
            OrderItem {
                name: "pelmeni".to_string(),
                quantity: 2,
            },
            OrderItem {
                name: "borscht".to_string(),
                quantity: 1,
            },
        ],
    }
}
