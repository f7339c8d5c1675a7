//! Saga descriptor registry: rebuilds sagas from `(saga type, saga_id)` on
//! every reply.
//!
//! A worker process has no in-memory continuation for a saga that another
//! process (or an earlier cycle of this one) suspended. The registry maps
//! each saga type name to a factory and, at startup, binds one success and
//! one failure handler per async step onto the broker. Each bound handler
//! reconstructs the saga for the arrived `saga_id` and hands the reply to
//! the engine.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use crate::broker::TaskHandler;
use crate::engine::{Saga, SagaEngine};
use crate::error::{SagaError, SagaResult};

/// Builds a saga object for a given saga id.
pub type SagaFactory = Arc<dyn Fn(i64) -> BoxFuture<'static, SagaResult<Saga>> + Send + Sync>;

/// Lift a plain async fn into a [`SagaFactory`].
pub fn saga_factory<F, Fut>(f: F) -> SagaFactory
where
    F: Fn(i64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SagaResult<Saga>> + Send + 'static,
{
    Arc::new(move |saga_id| Box::pin(f(saga_id)))
}

/// One registered saga type.
pub struct SagaDescriptor {
    /// Saga type name, matching `SagaState::saga_name`
    pub name: String,

    /// Orchestrator-owned queue all of this saga's replies arrive on
    pub response_queue: String,

    pub factory: SagaFactory,
}

impl SagaDescriptor {
    pub fn new(
        name: impl Into<String>,
        response_queue: impl Into<String>,
        factory: SagaFactory,
    ) -> Self {
        Self {
            name: name.into(),
            response_queue: response_queue.into(),
            factory,
        }
    }
}

/// Process-wide map of saga types, built once at worker startup.
#[derive(Default)]
pub struct SagaRegistry {
    descriptors: Vec<SagaDescriptor>,
}

impl SagaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: SagaDescriptor) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SagaDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Queues a reply worker must consume, deduplicated.
    pub fn response_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .descriptors
            .iter()
            .map(|d| d.response_queue.clone())
            .collect();
        queues.sort();
        queues.dedup();
        queues
    }

    /// Build a saga of the given registered type for `saga_id`.
    pub async fn build_saga(&self, name: &str, saga_id: i64) -> SagaResult<Saga> {
        let descriptor = self.get(name).ok_or_else(|| SagaError::Generic {
            message: format!("no saga type registered under '{name}'"),
        })?;
        (descriptor.factory)(saga_id).await
    }

    /// Subscribe success and failure reply handlers for every async step of
    /// every registered saga type. The orchestrator registration entry
    /// point.
    pub async fn bind_reply_handlers(&self, engine: &SagaEngine) -> SagaResult<()> {
        for descriptor in &self.descriptors {
            // Prototype instance, only used to enumerate the async steps.
            let prototype = (descriptor.factory)(0).await?;

            for async_step in prototype.async_steps() {
                for task_name in [async_step.success_task_name(), async_step.failure_task_name()]
                {
                    let handler = reply_handler(descriptor.factory.clone(), engine.clone(), task_name.clone());
                    engine.broker().subscribe(&task_name, handler).await?;
                }
            }

            info!(
                saga = %descriptor.name,
                response_queue = %descriptor.response_queue,
                "reply handlers bound"
            );
        }

        Ok(())
    }
}

fn reply_handler(factory: SagaFactory, engine: SagaEngine, task_name: String) -> TaskHandler {
    Arc::new(move |saga_id, payload| {
        let factory = factory.clone();
        let engine = engine.clone();
        let task_name = task_name.clone();
        Box::pin(async move {
            let saga = factory(saga_id).await?;
            engine.handle_reply(&saga, &task_name, payload).await
        })
    })
}
