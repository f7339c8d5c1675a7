//! End-to-end saga engine scenarios over the in-memory broker and
//! repository.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use saga_framework::{
    command_action, failure_hook, local_action, reply_hook, saga_factory, terminal_hook,
    AsyncStep, ErrorPayload, InMemoryBroker, InMemorySagaRepository, MessageBroker, Saga,
    SagaDescriptor, SagaEngine, SagaError, SagaRegistry, SagaStateRepository, StepInfo,
    STATUS_FAILED, STATUS_SUCCEEDED,
};

const STEPS: [(&str, &str, &str); 4] = [
    ("A", "svc.a", "svc_a.commands"),
    ("B", "svc.b", "svc_b.commands"),
    ("C", "svc.c", "svc_c.commands"),
    ("D", "svc.d", "svc_d.commands"),
];

/// Shared recorder for hook invocations, in call order.
#[derive(Default)]
struct Trace {
    events: Mutex<Vec<String>>,
}

impl Trace {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn of_kind(&self, kind: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.starts_with(kind))
            .collect()
    }
}

struct Harness {
    engine: SagaEngine,
    broker: Arc<InMemoryBroker>,
    repository: Arc<InMemorySagaRepository>,
    trace: Arc<Trace>,
    success_count: Arc<AtomicUsize>,
    failure_count: Arc<AtomicUsize>,
    terminal_failure: Arc<Mutex<Option<ErrorPayload>>>,
}

impl Harness {
    fn new() -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let repository = Arc::new(InMemorySagaRepository::new());
        let engine = SagaEngine::new(broker.clone(), repository.clone());

        Self {
            engine,
            broker,
            repository,
            trace: Arc::new(Trace::default()),
            success_count: Arc::new(AtomicUsize::new(0)),
            failure_count: Arc::new(AtomicUsize::new(0)),
            terminal_failure: Arc::new(Mutex::new(None)),
        }
    }

    async fn new_saga_id(&self) -> i64 {
        self.repository
            .create("test_saga", HashMap::new())
            .await
            .unwrap()
            .saga_id
    }

    /// Four async steps A..D with recording hooks. `failing_action` makes
    /// that step's action raise instead of producing a payload;
    /// `failing_compensation` makes that step's compensation raise.
    fn build_saga(
        &self,
        saga_id: i64,
        failing_action: Option<&str>,
        failing_compensation: Option<&str>,
    ) -> Saga {
        let mut builder = Saga::builder("test_saga", saga_id);

        for (name, task, queue) in STEPS {
            builder = builder.step(self.build_step(
                name,
                task,
                queue,
                failing_action == Some(name),
                failing_compensation == Some(name),
            ));
        }

        let trace = self.trace.clone();
        let success_count = self.success_count.clone();
        let on_success = terminal_hook(move |ctx| {
            let trace = trace.clone();
            let success_count = success_count.clone();
            async move {
                ctx.update_status(STATUS_SUCCEEDED).await?;
                success_count.fetch_add(1, Ordering::SeqCst);
                trace.push("saga_success".to_string());
                Ok(())
            }
        });

        let trace = self.trace.clone();
        let failure_count = self.failure_count.clone();
        let terminal_failure = self.terminal_failure.clone();
        let on_failure = failure_hook(move |ctx, details: ErrorPayload| {
            let trace = trace.clone();
            let failure_count = failure_count.clone();
            let terminal_failure = terminal_failure.clone();
            async move {
                ctx.update_status(STATUS_FAILED).await?;
                failure_count.fetch_add(1, Ordering::SeqCst);
                *terminal_failure.lock().unwrap() = Some(details);
                trace.push("saga_failure".to_string());
                Ok(())
            }
        });

        builder
            .on_saga_success(on_success)
            .on_saga_failure(on_failure)
            .build()
    }

    fn build_step(
        &self,
        name: &str,
        task: &str,
        queue: &str,
        fail_action: bool,
        fail_compensation: bool,
    ) -> AsyncStep {
        let trace = self.trace.clone();
        let action = command_action(move |_ctx, step: StepInfo| {
            let trace = trace.clone();
            async move {
                if fail_action {
                    return Err(SagaError::ValidationFailed {
                        field: "payload".to_string(),
                        message: format!("cannot build payload for {}", step.name),
                    });
                }
                trace.push(format!("action:{}", step.name));
                Ok(json!({ "step": step.name }))
            }
        });

        let trace = self.trace.clone();
        let on_success = reply_hook(move |_ctx, step: StepInfo, _payload| {
            let trace = trace.clone();
            async move {
                trace.push(format!("on_success:{}", step.name));
                Ok(())
            }
        });

        let trace = self.trace.clone();
        let on_failure = reply_hook(move |_ctx, step: StepInfo, _payload| {
            let trace = trace.clone();
            async move {
                trace.push(format!("on_failure:{}", step.name));
                Ok(())
            }
        });

        let trace = self.trace.clone();
        let compensation = local_action(move |_ctx, step: StepInfo| {
            let trace = trace.clone();
            async move {
                trace.push(format!("compensate:{}", step.name));
                if fail_compensation {
                    return Err(SagaError::Generic {
                        message: format!("compensation of {} broke", step.name),
                    });
                }
                Ok(())
            }
        });

        AsyncStep::new(name, task, queue)
            .with_action(action)
            .with_on_success(on_success)
            .with_on_failure(on_failure)
            .with_compensation(compensation)
    }
}

fn success_topic(task: &str) -> String {
    format!("{task}.response.success")
}

fn failure_topic(task: &str) -> String {
    format!("{task}.response.failure")
}

#[tokio::test]
async fn happy_path_dispatches_all_steps_in_order() {
    let harness = Harness::new();
    let saga_id = harness.new_saga_id().await;
    let saga = harness.build_saga(saga_id, None, None);

    harness.engine.execute(&saga).await.unwrap();

    for (_, task, _) in STEPS {
        harness
            .engine
            .handle_reply(&saga, &success_topic(task), json!({"ok": true}))
            .await
            .unwrap();
    }

    let published = harness.broker.published();
    let queues: Vec<&str> = published.iter().map(|m| m.queue.as_str()).collect();
    assert_eq!(
        queues,
        vec![
            "svc_a.commands",
            "svc_b.commands",
            "svc_c.commands",
            "svc_d.commands"
        ]
    );
    assert!(published.iter().all(|m| m.saga_id == saga_id));

    assert_eq!(harness.success_count.load(Ordering::SeqCst), 1);
    assert_eq!(harness.failure_count.load(Ordering::SeqCst), 0);

    let state = harness.repository.get(saga_id).await.unwrap();
    assert_eq!(state.status, STATUS_SUCCEEDED);
    assert_eq!(
        state.last_message_id.as_deref(),
        Some(published.last().unwrap().id.as_str())
    );
    assert!(state.failed_step.is_none());
}

#[tokio::test]
async fn late_step_failure_compensates_backwards() {
    let harness = Harness::new();
    let saga_id = harness.new_saga_id().await;
    let saga = harness.build_saga(saga_id, None, None);

    harness.engine.execute(&saga).await.unwrap();
    for (_, task, _) in &STEPS[..3] {
        harness
            .engine
            .handle_reply(&saga, &success_topic(task), json!({"ok": true}))
            .await
            .unwrap();
    }

    let failure = json!({
        "type": "ValueError",
        "message": "nope",
        "module": "participant",
        "traceback": "Traceback: ..."
    });
    harness
        .engine
        .handle_reply(&saga, &failure_topic("svc.d"), failure.clone())
        .await
        .unwrap();

    assert_eq!(
        harness.trace.of_kind("compensate:"),
        vec![
            "compensate:D",
            "compensate:C",
            "compensate:B",
            "compensate:A"
        ]
    );

    let state = harness.repository.get(saga_id).await.unwrap();
    assert_eq!(state.status, STATUS_FAILED);
    assert_eq!(state.failed_step.as_deref(), Some("D"));
    assert!(state.failed_at.is_some());

    let details = state.failure_details.unwrap();
    assert_eq!(details.error_type, "ValueError");
    assert_eq!(details.message, "nope");

    let terminal = harness.terminal_failure.lock().unwrap().clone().unwrap();
    assert_eq!(terminal.to_value(), failure);
    assert_eq!(harness.failure_count.load(Ordering::SeqCst), 1);
    assert_eq!(harness.success_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mid_saga_failure_never_compensates_later_steps() {
    let harness = Harness::new();
    let saga_id = harness.new_saga_id().await;
    let saga = harness.build_saga(saga_id, None, None);

    harness.engine.execute(&saga).await.unwrap();
    harness
        .engine
        .handle_reply(&saga, &success_topic("svc.a"), Value::Null)
        .await
        .unwrap();

    let failure = json!({
        "type": "ValueError",
        "message": "nope",
        "module": "participant",
        "traceback": ""
    });
    harness
        .engine
        .handle_reply(&saga, &failure_topic("svc.b"), failure)
        .await
        .unwrap();

    assert_eq!(
        harness.trace.of_kind("compensate:"),
        vec!["compensate:B", "compensate:A"]
    );
    // C and D were never dispatched.
    assert_eq!(harness.broker.published().len(), 2);
}

#[tokio::test]
async fn orchestrator_side_raise_compensates_from_current_step() {
    let harness = Harness::new();
    let saga_id = harness.new_saga_id().await;
    let saga = harness.build_saga(saga_id, Some("B"), None);

    harness.engine.execute(&saga).await.unwrap();
    harness
        .engine
        .handle_reply(&saga, &success_topic("svc.a"), Value::Null)
        .await
        .unwrap();

    // B's action raised before any dispatch could happen.
    let published = harness.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].task_name, "svc.a");

    assert_eq!(
        harness.trace.of_kind("compensate:"),
        vec!["compensate:B", "compensate:A"]
    );

    let state = harness.repository.get(saga_id).await.unwrap();
    assert_eq!(state.failed_step.as_deref(), Some("B"));
    assert_eq!(
        state.failure_details.unwrap().error_type,
        "ValidationFailed"
    );
    assert_eq!(harness.failure_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn compensation_raise_does_not_stop_the_cascade() {
    let harness = Harness::new();
    let saga_id = harness.new_saga_id().await;
    let saga = harness.build_saga(saga_id, None, Some("C"));

    harness.engine.execute(&saga).await.unwrap();
    for (_, task, _) in &STEPS[..3] {
        harness
            .engine
            .handle_reply(&saga, &success_topic(task), Value::Null)
            .await
            .unwrap();
    }

    let failure = json!({
        "type": "ValueError",
        "message": "nope",
        "module": "participant",
        "traceback": ""
    });
    harness
        .engine
        .handle_reply(&saga, &failure_topic("svc.d"), failure.clone())
        .await
        .unwrap();

    assert_eq!(
        harness.trace.of_kind("compensate:"),
        vec![
            "compensate:D",
            "compensate:C",
            "compensate:B",
            "compensate:A"
        ]
    );
    assert_eq!(harness.failure_count.load(Ordering::SeqCst), 1);

    // The recorded failure is still D's original payload, not C's
    // compensation error.
    let state = harness.repository.get(saga_id).await.unwrap();
    let details = state.failure_details.unwrap();
    assert_eq!(details.error_type, "ValueError");
    assert_eq!(details.message, "nope");

    let terminal = harness.terminal_failure.lock().unwrap().clone().unwrap();
    assert_eq!(terminal.to_value(), failure);
}

#[tokio::test]
async fn success_reply_invokes_only_the_matching_step() {
    let harness = Harness::new();
    let saga_id = harness.new_saga_id().await;
    let saga = harness.build_saga(saga_id, None, None);

    harness.engine.execute(&saga).await.unwrap();
    harness
        .engine
        .handle_reply(&saga, &success_topic("svc.a"), Value::Null)
        .await
        .unwrap();

    assert_eq!(harness.trace.of_kind("on_success:"), vec!["on_success:A"]);
    assert!(harness.trace.of_kind("on_failure:").is_empty());
}

#[tokio::test]
async fn duplicate_replies_are_dropped() {
    let harness = Harness::new();
    let saga_id = harness.new_saga_id().await;
    let saga = harness.build_saga(saga_id, None, None);

    harness.engine.execute(&saga).await.unwrap();
    harness
        .engine
        .handle_reply(&saga, &success_topic("svc.a"), Value::Null)
        .await
        .unwrap();
    // Redelivery of the same reply.
    harness
        .engine
        .handle_reply(&saga, &success_topic("svc.a"), Value::Null)
        .await
        .unwrap();

    assert_eq!(harness.trace.of_kind("on_success:"), vec!["on_success:A"]);
    // B was dispatched exactly once.
    let dispatched_b: Vec<_> = harness
        .broker
        .published()
        .into_iter()
        .filter(|m| m.task_name == "svc.b")
        .collect();
    assert_eq!(dispatched_b.len(), 1);
}

#[tokio::test]
async fn terminal_hooks_fire_at_most_once() {
    let harness = Harness::new();
    let saga_id = harness.new_saga_id().await;
    let saga = harness.build_saga(saga_id, None, None);

    harness.engine.execute(&saga).await.unwrap();
    for (_, task, _) in STEPS {
        harness
            .engine
            .handle_reply(&saga, &success_topic(task), Value::Null)
            .await
            .unwrap();
    }
    // Redelivered final reply must not re-run the terminal hook.
    harness
        .engine
        .handle_reply(&saga, &success_topic("svc.d"), Value::Null)
        .await
        .unwrap();

    assert_eq!(harness.success_count.load(Ordering::SeqCst), 1);
    assert_eq!(harness.failure_count.load(Ordering::SeqCst), 0);
}

/// Full loop through the registry: replies arrive on the response queue,
/// handlers rebuild the saga from `(saga type, saga_id)` and each reply
/// updates only its own saga's row.
#[tokio::test]
async fn registry_routes_replies_to_the_owning_saga() {
    let harness = Arc::new(Harness::new());
    let response_queue = "test_saga.response";

    let mut registry = SagaRegistry::new();
    let factory_harness = harness.clone();
    registry.register(SagaDescriptor::new(
        "test_saga",
        response_queue,
        saga_factory(move |saga_id| {
            let harness = factory_harness.clone();
            async move { Ok(harness.build_saga(saga_id, None, None)) }
        }),
    ));
    registry.bind_reply_handlers(&harness.engine).await.unwrap();

    let first = harness.new_saga_id().await;
    let second = harness.new_saga_id().await;
    for saga_id in [first, second] {
        let saga = harness.build_saga(saga_id, None, None);
        harness.engine.execute(&saga).await.unwrap();
    }

    // The participant for step A replies success to the first saga only.
    harness
        .broker
        .send_task(response_queue, &success_topic("svc.a"), first, &Value::Null)
        .await
        .unwrap();
    harness.broker.drain(response_queue).await.unwrap();

    // First saga advanced to B; second still waits on A.
    let dispatched: Vec<(i64, String)> = harness
        .broker
        .published()
        .into_iter()
        .filter(|m| m.queue.ends_with(".commands"))
        .map(|m| (m.saga_id, m.task_name))
        .collect();
    assert!(dispatched.contains(&(first, "svc.b".to_string())));
    assert!(!dispatched.contains(&(second, "svc.b".to_string())));

    let first_state = harness.repository.get(first).await.unwrap();
    let second_state = harness.repository.get(second).await.unwrap();
    assert_ne!(first_state.last_message_id, second_state.last_message_id);
}

/// Compensations may dispatch broker messages; the engine treats those as
/// fire-and-forget and moves on immediately.
#[tokio::test]
async fn compensation_dispatch_is_fire_and_forget() {
    let broker = Arc::new(InMemoryBroker::new());
    let repository = Arc::new(InMemorySagaRepository::new());
    let engine = SagaEngine::new(broker.clone(), repository.clone());

    let saga_id = repository
        .create("cancel_saga", HashMap::new())
        .await
        .unwrap()
        .saga_id;

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let order_ = order.clone();
    let cancelling = AsyncStep::new("create thing", "thing.create", "thing.commands")
        .with_action(command_action(|_ctx, _step| async move {
            Ok(json!({"thing": 1}))
        }))
        .with_compensation(local_action(move |ctx, _step| {
            let order = order_.clone();
            async move {
                ctx.send_to_service("thing.cancel", "thing.commands", &json!({"thing": 1}))
                    .await?;
                order.lock().unwrap().push("cancel_sent");
                Ok(())
            }
        }));

    let order_ = order.clone();
    let saga = Saga::builder("cancel_saga", saga_id)
        .step(cancelling)
        .on_saga_failure(failure_hook(move |_ctx, _details| {
            let order = order_.clone();
            async move {
                order.lock().unwrap().push("saga_failure");
                Ok(())
            }
        }))
        .build();

    engine.execute(&saga).await.unwrap();
    engine
        .handle_reply(
            &saga,
            "thing.create.response.failure",
            json!({"type": "ValueError", "message": "no", "module": "", "traceback": ""}),
        )
        .await
        .unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["cancel_sent", "saga_failure"]);

    let cancels: Vec<_> = broker
        .published()
        .into_iter()
        .filter(|m| m.task_name == "thing.cancel")
        .collect();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].saga_id, saga_id);
}
