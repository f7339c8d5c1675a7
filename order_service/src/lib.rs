//! Order orchestrator: owns the create-order saga and the order entity it
//! operates on.

pub mod orders;
pub mod saga;

pub use orders::{InMemoryOrderStore, NewOrder, Order, OrderItem, OrderStatus, OrderStore};
pub use saga::{
    build_create_order_saga, create_order_saga_descriptor, start_create_order_saga, SAGA_NAME,
};
