//! Participant-side wrapper behavior against the in-memory broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use saga_framework::{
    command_handler, compensation_step_handler, saga_step_handler, saga_step_handler_with_retry,
    InMemoryBroker, RetryPolicy, SagaError,
};

const RESPONSE_QUEUE: &str = "create_order_saga.response";

#[tokio::test]
async fn handler_success_publishes_one_success_reply() {
    let broker = Arc::new(InMemoryBroker::new());

    let handler = saga_step_handler(
        broker.clone(),
        "x.do",
        RESPONSE_QUEUE,
        command_handler(|_saga_id, _payload| async move { Ok(Some(json!({"id": 7}))) }),
    );

    handler(42, json!({"input": true})).await.unwrap();

    let published = broker.published_to(RESPONSE_QUEUE);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].task_name, "x.do.response.success");
    assert_eq!(published[0].saga_id, 42);
    assert_eq!(published[0].payload, json!({"id": 7}));
}

#[tokio::test]
async fn handler_returning_none_publishes_empty_success_body() {
    let broker = Arc::new(InMemoryBroker::new());

    let handler = saga_step_handler(
        broker.clone(),
        "consumer_service.verify_consumer_details",
        RESPONSE_QUEUE,
        command_handler(|_saga_id, _payload| async move { Ok(None) }),
    );

    handler(7, json!({"consumer_id": 70})).await.unwrap();

    let published = broker.published_to(RESPONSE_QUEUE);
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].task_name,
        "consumer_service.verify_consumer_details.response.success"
    );
    assert_eq!(published[0].payload, Value::Null);
}

#[tokio::test]
async fn handler_error_publishes_serialized_failure_reply() {
    let broker = Arc::new(InMemoryBroker::new());

    let handler = saga_step_handler(
        broker.clone(),
        "x.do",
        RESPONSE_QUEUE,
        command_handler(|_saga_id, _payload| async move {
            Err(SagaError::ValidationFailed {
                field: "amount".to_string(),
                message: "insufficient balance".to_string(),
            })
        }),
    );

    handler(42, Value::Null).await.unwrap();

    let published = broker.published_to(RESPONSE_QUEUE);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].task_name, "x.do.response.failure");
    assert_eq!(published[0].payload["type"], "ValidationFailed");
    assert!(published[0].payload["message"]
        .as_str()
        .unwrap()
        .contains("insufficient balance"));
    assert!(published[0].payload.get("traceback").is_some());
}

#[tokio::test]
async fn retry_wrapper_retries_then_succeeds() {
    let broker = Arc::new(InMemoryBroker::new());
    let attempts = Arc::new(AtomicUsize::new(0));

    let attempts_ = attempts.clone();
    let handler = saga_step_handler_with_retry(
        broker.clone(),
        "restaurant_service.approve_ticket",
        RESPONSE_QUEUE,
        RetryPolicy::new(2, Duration::from_millis(1)),
        command_handler(move |_saga_id, _payload| {
            let attempts = attempts_.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SagaError::Generic {
                        message: "transient".to_string(),
                    })
                } else {
                    Ok(None)
                }
            }
        }),
    );

    handler(9, json!({"ticket_id": 250})).await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let published = broker.published_to(RESPONSE_QUEUE);
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].task_name,
        "restaurant_service.approve_ticket.response.success"
    );
}

#[tokio::test]
async fn retry_wrapper_publishes_failure_after_last_attempt() {
    let broker = Arc::new(InMemoryBroker::new());
    let attempts = Arc::new(AtomicUsize::new(0));

    let attempts_ = attempts.clone();
    let handler = saga_step_handler_with_retry(
        broker.clone(),
        "x.do",
        RESPONSE_QUEUE,
        RetryPolicy::new(2, Duration::from_millis(1)),
        command_handler(move |_saga_id, _payload| {
            let attempts = attempts_.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(SagaError::Generic {
                    message: "still broken".to_string(),
                })
            }
        }),
    );

    handler(9, Value::Null).await.unwrap();

    // Initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let published = broker.published_to(RESPONSE_QUEUE);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].task_name, "x.do.response.failure");
    assert_eq!(published[0].payload["type"], "Generic");
}

#[tokio::test]
async fn compensation_handler_publishes_nothing() {
    let broker = Arc::new(InMemoryBroker::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let calls_ = calls.clone();
    let handler = compensation_step_handler(
        "restaurant_service.reject_ticket",
        command_handler(move |_saga_id, _payload| {
            let calls = calls_.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }),
    );

    handler(9, json!({"ticket_id": 250})).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn compensation_handler_swallows_errors() {
    let broker = Arc::new(InMemoryBroker::new());

    let handler = compensation_step_handler(
        "restaurant_service.reject_ticket",
        command_handler(|_saga_id, _payload| async move {
            Err(SagaError::Generic {
                message: "reject failed".to_string(),
            })
        }),
    );

    // Best-effort by contract: the wrapper neither propagates nor replies.
    handler(9, Value::Null).await.unwrap();
    assert!(broker.published().is_empty());
}
