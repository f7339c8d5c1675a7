//! Order entity and its store.
//!
//! Business persistence is an external collaborator; the saga only needs
//! this narrow interface. The in-memory implementation backs tests and the
//! demo worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use saga_framework::{SagaError, SagaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingValidation,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub status: OrderStatus,
    pub consumer_id: i64,
    pub card_id: i64,
    pub price: i64,
    pub items: Vec<OrderItem>,
    pub restaurant_ticket_id: Option<i64>,
    pub transaction_id: Option<i64>,
}

/// Fields needed to create an order; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub consumer_id: i64,
    pub card_id: i64,
    pub price: i64,
    pub items: Vec<OrderItem>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, order: NewOrder) -> SagaResult<Order>;

    async fn get(&self, order_id: i64) -> SagaResult<Order>;

    async fn update_status(&self, order_id: i64, status: OrderStatus) -> SagaResult<()>;

    /// Record the ticket the restaurant created for this order.
    async fn set_restaurant_ticket(&self, order_id: i64, ticket_id: i64) -> SagaResult<()>;

    /// Record the card authorization transaction.
    async fn set_transaction(&self, order_id: i64, transaction_id: i64) -> SagaResult<()>;
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<i64, Order>>,
    next_id: AtomicI64,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn with_order<T>(&self, order_id: i64, f: impl FnOnce(&mut Order) -> T) -> SagaResult<T> {
        let mut orders = self.orders.lock().expect("orders lock poisoned");
        let order = orders.get_mut(&order_id).ok_or_else(|| SagaError::Generic {
            message: format!("no order found with id {order_id}"),
        })?;
        Ok(f(order))
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, new_order: NewOrder) -> SagaResult<Order> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let order = Order {
            id,
            status: OrderStatus::PendingValidation,
            consumer_id: new_order.consumer_id,
            card_id: new_order.card_id,
            price: new_order.price,
            items: new_order.items,
            restaurant_ticket_id: None,
            transaction_id: None,
        };

        self.orders
            .lock()
            .expect("orders lock poisoned")
            .insert(id, order.clone());

        Ok(order)
    }

    async fn get(&self, order_id: i64) -> SagaResult<Order> {
        self.with_order(order_id, |order| order.clone())
    }

    async fn update_status(&self, order_id: i64, status: OrderStatus) -> SagaResult<()> {
        self.with_order(order_id, |order| order.status = status)
    }

    async fn set_restaurant_ticket(&self, order_id: i64, ticket_id: i64) -> SagaResult<()> {
        self.with_order(order_id, |order| {
            order.restaurant_ticket_id = Some(ticket_id)
        })
    }

    async fn set_transaction(&self, order_id: i64, transaction_id: i64) -> SagaResult<()> {
        self.with_order(order_id, |order| order.transaction_id = Some(transaction_id))
    }
}
