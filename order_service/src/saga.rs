//! The create-order saga.
//!
//! Six steps: a compensation-only placeholder that rejects the order, four
//! remote commands against the consumer, restaurant and accounting
//! services, and a final local step approving the order.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use order_messaging::{
    accounting_service, consumer_service, restaurant_service, CREATE_ORDER_SAGA_RESPONSE_QUEUE,
};
use saga_framework::{
    command_action, failure_hook, local_action, reply_hook, saga_factory, terminal_hook,
    AsyncStep, Saga, SagaContext, SagaDescriptor, SagaEngine, SagaError, SagaResult,
    SagaStateRepository, StatePatch, SyncStep,
};

use crate::orders::{NewOrder, Order, OrderStatus, OrderStore};

pub const SAGA_NAME: &str = "create_order_saga";

/// State property carrying the order this saga operates on.
pub const ORDER_ID_PROPERTY: &str = "order_id";

/// Status labels recorded as the saga progresses.
pub mod status {
    pub const ORDER_CREATED: &str = "ORDER_CREATED";
    pub const VERIFYING_CONSUMER_DETAILS: &str = "VERIFYING_CONSUMER_DETAILS";
    pub const CREATING_RESTAURANT_TICKET: &str = "CREATING_RESTAURANT_TICKET";
    pub const AUTHORIZING_CREDIT_CARD: &str = "AUTHORIZING_CREDIT_CARD";
    pub const APPROVING_RESTAURANT_TICKET: &str = "APPROVING_RESTAURANT_TICKET";
    pub const SUCCEEDED: &str = "SUCCEEDED";
    pub const REJECTING_RESTAURANT_TICKET: &str = "REJECTING_RESTAURANT_TICKET";
    pub const FAILED: &str = "FAILED";
}

/// Load the order this saga operates on from its state row.
async fn saga_order(ctx: &SagaContext, orders: &Arc<dyn OrderStore>) -> SagaResult<Order> {
    let state = ctx.state().await?;
    let order_id = state
        .property_i64(ORDER_ID_PROPERTY)
        .ok_or_else(|| SagaError::Generic {
            message: format!("saga {} has no {ORDER_ID_PROPERTY} property", ctx.saga_id),
        })?;
    orders.get(order_id).await
}

/// Registry descriptor for the create-order saga type.
pub fn create_order_saga_descriptor(orders: Arc<dyn OrderStore>) -> SagaDescriptor {
    SagaDescriptor::new(
        SAGA_NAME,
        CREATE_ORDER_SAGA_RESPONSE_QUEUE,
        saga_factory(move |saga_id| {
            let orders = orders.clone();
            async move { Ok(build_create_order_saga(saga_id, orders)) }
        }),
    )
}

/// Create the order, create the saga state row, and run the first step.
pub async fn start_create_order_saga(
    engine: &SagaEngine,
    orders: Arc<dyn OrderStore>,
    new_order: NewOrder,
) -> SagaResult<(Order, i64)> {
    let order = orders.create(new_order).await?;

    let mut properties = HashMap::new();
    properties.insert(ORDER_ID_PROPERTY.to_string(), json!(order.id));

    let repository = engine.repository();
    let state = repository.create(SAGA_NAME, properties).await?;
    repository
        .update_status(state.saga_id, status::ORDER_CREATED)
        .await?;

    info!(order_id = order.id, saga_id = state.saga_id, "starting create-order saga");

    let saga = build_create_order_saga(state.saga_id, orders);
    engine.execute(&saga).await?;

    Ok((order, state.saga_id))
}

/// Assemble the saga instance for `saga_id`. Called by the initiator and,
/// through the registry factory, on every reply.
pub fn build_create_order_saga(saga_id: i64, orders: Arc<dyn OrderStore>) -> Saga {
    Saga::builder(SAGA_NAME, saga_id)
        .step(reject_order_step(orders.clone()))
        .step(verify_consumer_details_step(orders.clone()))
        .step(create_restaurant_ticket_step(orders.clone()))
        .step(authorize_card_step(orders.clone()))
        .step(approve_restaurant_ticket_step(orders.clone()))
        .step(approve_order_step(orders))
        .on_saga_success(terminal_hook(|ctx: SagaContext| async move {
            ctx.update(
                StatePatch::new()
                    .with_status(status::SUCCEEDED)
                    .with_last_message_id(None),
            )
            .await?;
            info!(saga_id = ctx.saga_id, "create-order saga succeeded");
            Ok(())
        }))
        .on_saga_failure(failure_hook(|ctx: SagaContext, details| async move {
            ctx.update_status(status::FAILED).await?;
            info!(
                saga_id = ctx.saga_id,
                failure_type = %details.error_type,
                failure_message = %details.message,
                "create-order saga failed"
            );
            Ok(())
        }))
        .build()
}

/// Placeholder first step: nothing to do forwards, but its compensation
/// rejects the order whenever any later step fails.
fn reject_order_step(orders: Arc<dyn OrderStore>) -> SyncStep {
    SyncStep::new("reject order").with_compensation(local_action(move |ctx, _step| {
        let orders = orders.clone();
        async move {
            let order = saga_order(&ctx, &orders).await?;
            orders.update_status(order.id, OrderStatus::Rejected).await?;
            info!(
                saga_id = ctx.saga_id,
                order_id = order.id,
                "compensation: order rejected"
            );
            Ok(())
        }
    }))
}

fn verify_consumer_details_step(orders: Arc<dyn OrderStore>) -> AsyncStep {
    let action_orders = orders.clone();

    AsyncStep::new(
        "verify consumer details",
        consumer_service::verify_consumer_details::TASK_NAME,
        consumer_service::COMMANDS_QUEUE,
    )
    .with_action(command_action(move |ctx, _step| {
        let orders = action_orders.clone();
        async move {
            let order = saga_order(&ctx, &orders).await?;
            info!(
                saga_id = ctx.saga_id,
                consumer_id = order.consumer_id,
                "verifying consumer"
            );
            ctx.update_status(status::VERIFYING_CONSUMER_DETAILS).await?;

            Ok(serde_json::to_value(
                consumer_service::verify_consumer_details::Payload {
                    consumer_id: order.consumer_id,
                },
            )?)
        }
    }))
    .with_on_success(reply_hook(|ctx: SagaContext, _step, _payload| async move {
        info!(saga_id = ctx.saga_id, "consumer verification succeeded");
        Ok(())
    }))
    .with_on_failure(reply_hook(|ctx: SagaContext, _step, payload| async move {
        info!(saga_id = ctx.saga_id, reply = %payload, "consumer verification failed");
        Ok(())
    }))
}

fn create_restaurant_ticket_step(orders: Arc<dyn OrderStore>) -> AsyncStep {
    let action_orders = orders.clone();
    let success_orders = orders.clone();

    AsyncStep::new(
        "create restaurant ticket",
        restaurant_service::create_ticket::TASK_NAME,
        restaurant_service::COMMANDS_QUEUE,
    )
    .with_action(command_action(move |ctx, _step| {
        let orders = action_orders.clone();
        async move {
            let order = saga_order(&ctx, &orders).await?;
            ctx.update_status(status::CREATING_RESTAURANT_TICKET).await?;

            Ok(serde_json::to_value(
                restaurant_service::create_ticket::Payload {
                    order_id: order.id,
                    customer_id: order.consumer_id,
                    items: order
                        .items
                        .iter()
                        .map(|item| restaurant_service::create_ticket::OrderItem {
                            name: item.name.clone(),
                            quantity: item.quantity,
                        })
                        .collect(),
                },
            )?)
        }
    }))
    .with_on_success(reply_hook(move |ctx: SagaContext, _step, payload| {
        let orders = success_orders.clone();
        async move {
            let response: restaurant_service::create_ticket::Response =
                serde_json::from_value(payload)?;
            let order = saga_order(&ctx, &orders).await?;
            orders
                .set_restaurant_ticket(order.id, response.ticket_id)
                .await?;
            info!(
                saga_id = ctx.saga_id,
                ticket_id = response.ticket_id,
                "restaurant ticket created"
            );
            Ok(())
        }
    }))
    .with_compensation(local_action(move |ctx, _step| {
        let orders = orders.clone();
        async move {
            let order = saga_order(&ctx, &orders).await?;

            // The remote may have created the ticket before replying
            // failure; without a recorded ticket there is nothing to undo.
            let Some(ticket_id) = order.restaurant_ticket_id else {
                return Ok(());
            };

            ctx.update_status(status::REJECTING_RESTAURANT_TICKET).await?;
            ctx.send_to_service(
                restaurant_service::reject_ticket::TASK_NAME,
                restaurant_service::COMMANDS_QUEUE,
                &serde_json::to_value(restaurant_service::reject_ticket::Payload { ticket_id })?,
            )
            .await?;
            info!(
                saga_id = ctx.saga_id,
                ticket_id, "compensation: restaurant ticket rejection sent"
            );
            Ok(())
        }
    }))
}

fn authorize_card_step(orders: Arc<dyn OrderStore>) -> AsyncStep {
    let action_orders = orders.clone();

    AsyncStep::new(
        "authorize card",
        accounting_service::authorize_card::TASK_NAME,
        accounting_service::COMMANDS_QUEUE,
    )
    .with_action(command_action(move |ctx, _step| {
        let orders = action_orders.clone();
        async move {
            let order = saga_order(&ctx, &orders).await?;
            info!(saga_id = ctx.saga_id, amount = order.price, "authorizing card");
            ctx.update_status(status::AUTHORIZING_CREDIT_CARD).await?;

            Ok(serde_json::to_value(
                accounting_service::authorize_card::Payload {
                    card_id: order.card_id,
                    amount: order.price,
                },
            )?)
        }
    }))
    .with_on_success(reply_hook(move |ctx: SagaContext, _step, payload| {
        let orders = orders.clone();
        async move {
            let response: accounting_service::authorize_card::Response =
                serde_json::from_value(payload)?;
            let order = saga_order(&ctx, &orders).await?;
            orders.set_transaction(order.id, response.transaction_id).await?;
            info!(
                saga_id = ctx.saga_id,
                transaction_id = response.transaction_id,
                "card authorized"
            );
            Ok(())
        }
    }))
}

fn approve_restaurant_ticket_step(orders: Arc<dyn OrderStore>) -> AsyncStep {
    AsyncStep::new(
        "approve restaurant ticket",
        restaurant_service::approve_ticket::TASK_NAME,
        restaurant_service::COMMANDS_QUEUE,
    )
    .with_action(command_action(move |ctx, _step| {
        let orders = orders.clone();
        async move {
            let order = saga_order(&ctx, &orders).await?;
            let ticket_id =
                order
                    .restaurant_ticket_id
                    .ok_or_else(|| SagaError::Generic {
                        message: format!("order {} has no restaurant ticket to approve", order.id),
                    })?;
            ctx.update_status(status::APPROVING_RESTAURANT_TICKET).await?;

            Ok(serde_json::to_value(
                restaurant_service::approve_ticket::Payload { ticket_id },
            )?)
        }
    }))
}

fn approve_order_step(orders: Arc<dyn OrderStore>) -> SyncStep {
    SyncStep::new("approve order").with_action(local_action(move |ctx, _step| {
        let orders = orders.clone();
        async move {
            let order = saga_order(&ctx, &orders).await?;
            orders.update_status(order.id, OrderStatus::Approved).await?;
            info!(saga_id = ctx.saga_id, order_id = order.id, "order approved");
            Ok(())
        }
    }))
}
