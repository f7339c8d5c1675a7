//! Command and reply contracts shared between the order orchestrator and
//! the participant services.
//!
//! Task names double as request topics; the reply topics are derived from
//! them by the framework's naming rules. Queue constants follow the
//! one-commands-queue-per-participant, one-response-queue-per-saga layout.

use serde::{Deserialize, Serialize};

/// Orchestrator-owned queue all create-order saga replies arrive on.
pub const CREATE_ORDER_SAGA_RESPONSE_QUEUE: &str = "create_order_saga.response";

pub mod consumer_service {
    use super::*;

    pub const COMMANDS_QUEUE: &str = "consumer_service.commands";

    pub mod verify_consumer_details {
        use super::*;

        pub const TASK_NAME: &str = "consumer_service.verify_consumer_details";

        /// Command payload. A correct consumer produces an empty success
        /// reply; validation failures come back as failure replies.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct Payload {
            pub consumer_id: i64,
        }
    }
}

pub mod accounting_service {
    use super::*;

    pub const COMMANDS_QUEUE: &str = "accounting_service.commands";

    pub mod authorize_card {
        use super::*;

        pub const TASK_NAME: &str = "accounting_service.authorize_card";

        /// Authorize money from a previously saved card.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct Payload {
            pub card_id: i64,
            pub amount: i64,
        }

        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct Response {
            pub transaction_id: i64,
        }
    }
}

pub mod restaurant_service {
    use super::*;

    pub const COMMANDS_QUEUE: &str = "restaurant_service.commands";

    pub mod create_ticket {
        use super::*;

        pub const TASK_NAME: &str = "restaurant_service.create_ticket";

        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct OrderItem {
            pub name: String,
            pub quantity: u32,
        }

        /// Create a ticket so the restaurant knows the order details.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct Payload {
            pub order_id: i64,
            pub customer_id: i64,
            pub items: Vec<OrderItem>,
        }

        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct Response {
            pub ticket_id: i64,
        }
    }

    pub mod reject_ticket {
        use super::*;

        pub const TASK_NAME: &str = "restaurant_service.reject_ticket";

        /// Compensation command: rejects an already created ticket. No
        /// response is sent back.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct Payload {
            pub ticket_id: i64,
        }
    }

    pub mod approve_ticket {
        use super::*;

        pub const TASK_NAME: &str = "restaurant_service.approve_ticket";

        /// Approve a previously created ticket. Returns an empty response.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct Payload {
            pub ticket_id: i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_shapes() {
        let payload = restaurant_service::create_ticket::Payload {
            order_id: 1,
            customer_id: 70,
            items: vec![restaurant_service::create_ticket::OrderItem {
                name: "pelmeni".to_string(),
                quantity: 2,
            }],
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["order_id"], 1);
        assert_eq!(value["items"][0]["name"], "pelmeni");

        let response: accounting_service::authorize_card::Response =
            serde_json::from_value(serde_json::json!({"transaction_id": 555})).unwrap();
        assert_eq!(response.transaction_id, 555);
    }
}
