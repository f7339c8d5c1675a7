//! Saga engine: forward step execution, reply handling and the
//! compensation cascade.
//!
//! The engine is stateless between messages. Each reply is a self-contained
//! handling cycle: rebuild the saga object, load state from the repository,
//! run the reply hook, then either dispatch the next command or cascade
//! compensations. The worker that dispatched a command keeps nothing in
//! memory for the reply.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::broker::MessageBroker;
use crate::error::{SagaError, SagaResult};
use crate::messaging::ErrorPayload;
use crate::repository::SagaStateRepository;
use crate::state::{ReplyOutcome, SagaState, StatePatch};
use crate::step::{AsyncStep, Step};

/// Default terminal status labels recorded by the built-in terminal hooks.
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

/// Hook invoked once when a saga completes its last step.
pub type TerminalHook =
    Arc<dyn Fn(SagaContext) -> BoxFuture<'static, SagaResult<()>> + Send + Sync>;

/// Hook invoked once after the last compensation, with the initial failure.
pub type FailureHook =
    Arc<dyn Fn(SagaContext, ErrorPayload) -> BoxFuture<'static, SagaResult<()>> + Send + Sync>;

/// Lift a plain async fn into a [`TerminalHook`].
pub fn terminal_hook<F, Fut>(f: F) -> TerminalHook
where
    F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SagaResult<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Lift a plain async fn into a [`FailureHook`].
pub fn failure_hook<F, Fut>(f: F) -> FailureHook
where
    F: Fn(SagaContext, ErrorPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SagaResult<()>> + Send + 'static,
{
    Arc::new(move |ctx, details| Box::pin(f(ctx, details)))
}

fn default_on_saga_success() -> TerminalHook {
    terminal_hook(|ctx: SagaContext| async move {
        ctx.update_status(STATUS_SUCCEEDED).await?;
        info!(saga_id = ctx.saga_id, "saga succeeded");
        Ok(())
    })
}

fn default_on_saga_failure() -> FailureHook {
    failure_hook(|ctx: SagaContext, details: ErrorPayload| async move {
        ctx.update_status(STATUS_FAILED).await?;
        info!(
            saga_id = ctx.saga_id,
            failure_type = %details.error_type,
            failure_message = %details.message,
            "saga failed"
        );
        Ok(())
    })
}

/// Saga-scoped view of the engine's dependencies, handed to every hook.
#[derive(Clone)]
pub struct SagaContext {
    pub saga_id: i64,
    pub broker: Arc<dyn MessageBroker>,
    pub repository: Arc<dyn SagaStateRepository>,
}

impl SagaContext {
    /// Load the current state row.
    pub async fn state(&self) -> SagaResult<SagaState> {
        self.repository.get(self.saga_id).await
    }

    /// Set the saga's status label.
    pub async fn update_status(&self, status: &str) -> SagaResult<()> {
        self.repository.update_status(self.saga_id, status).await
    }

    /// Apply a generic state patch.
    pub async fn update(&self, patch: StatePatch) -> SagaResult<()> {
        self.repository.update(self.saga_id, patch).await
    }

    /// Send a fire-and-forget command to another service, recording the
    /// message id. Used by compensation hooks that undo remote work; no
    /// reply is awaited.
    pub async fn send_to_service(
        &self,
        task_name: &str,
        queue: &str,
        payload: &Value,
    ) -> SagaResult<String> {
        let message_id = self
            .broker
            .send_task(queue, task_name, self.saga_id, payload)
            .await?;
        self.repository
            .update(
                self.saga_id,
                StatePatch::new().with_last_message_id(Some(message_id.clone())),
            )
            .await?;
        Ok(message_id)
    }
}

/// An ordered sequence of steps bound to a saga id.
///
/// The step list is fixed at construction; steps are never reordered or
/// mutated afterwards.
pub struct Saga {
    name: String,
    saga_id: i64,
    steps: Vec<Step>,
    on_saga_success: TerminalHook,
    on_saga_failure: FailureHook,
}

impl fmt::Debug for Saga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saga")
            .field("name", &self.name)
            .field("saga_id", &self.saga_id)
            .field("steps", &self.steps)
            .finish()
    }
}

impl Saga {
    pub fn builder(name: impl Into<String>, saga_id: i64) -> SagaBuilder {
        SagaBuilder::new(name, saga_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn saga_id(&self) -> i64 {
        self.saga_id
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The async steps, in declaration order.
    pub fn async_steps(&self) -> impl Iterator<Item = &AsyncStep> {
        self.steps.iter().filter_map(Step::as_async)
    }

    fn async_index_by(&self, f: impl Fn(&AsyncStep) -> String, task_name: &str) -> Option<usize> {
        self.steps.iter().position(|step| {
            step.as_async()
                .is_some_and(|async_step| f(async_step) == task_name)
        })
    }

    /// Locate the step whose derived success topic is `task_name`.
    pub fn step_index_by_success_task_name(&self, task_name: &str) -> Option<usize> {
        self.async_index_by(AsyncStep::success_task_name, task_name)
    }

    /// Locate the step whose derived failure topic is `task_name`.
    pub fn step_index_by_failure_task_name(&self, task_name: &str) -> Option<usize> {
        self.async_index_by(AsyncStep::failure_task_name, task_name)
    }
}

/// Builder for concrete sagas.
pub struct SagaBuilder {
    name: String,
    saga_id: i64,
    steps: Vec<Step>,
    on_saga_success: TerminalHook,
    on_saga_failure: FailureHook,
}

impl SagaBuilder {
    pub fn new(name: impl Into<String>, saga_id: i64) -> Self {
        Self {
            name: name.into(),
            saga_id,
            steps: Vec::new(),
            on_saga_success: default_on_saga_success(),
            on_saga_failure: default_on_saga_failure(),
        }
    }

    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn on_saga_success(mut self, hook: TerminalHook) -> Self {
        self.on_saga_success = hook;
        self
    }

    pub fn on_saga_failure(mut self, hook: FailureHook) -> Self {
        self.on_saga_failure = hook;
        self
    }

    pub fn build(self) -> Saga {
        Saga {
            name: self.name,
            saga_id: self.saga_id,
            steps: self.steps,
            on_saga_success: self.on_saga_success,
            on_saga_failure: self.on_saga_failure,
        }
    }
}

/// Drives sagas against a broker and a state repository.
#[derive(Clone)]
pub struct SagaEngine {
    broker: Arc<dyn MessageBroker>,
    repository: Arc<dyn SagaStateRepository>,
}

impl SagaEngine {
    pub fn new(broker: Arc<dyn MessageBroker>, repository: Arc<dyn SagaStateRepository>) -> Self {
        Self { broker, repository }
    }

    pub fn broker(&self) -> Arc<dyn MessageBroker> {
        self.broker.clone()
    }

    pub fn repository(&self) -> Arc<dyn SagaStateRepository> {
        self.repository.clone()
    }

    /// Saga-scoped context handed to hooks.
    pub fn context(&self, saga_id: i64) -> SagaContext {
        SagaContext {
            saga_id,
            broker: self.broker.clone(),
            repository: self.repository.clone(),
        }
    }

    /// Run the saga's first step. Sync steps chain immediately; the first
    /// async step dispatches its command and returns, leaving further
    /// progress to reply handling.
    pub async fn execute(&self, saga: &Saga) -> SagaResult<()> {
        self.run_from(saga, 0).await
    }

    /// Forward loop starting at `index`.
    async fn run_from(&self, saga: &Saga, mut index: usize) -> SagaResult<()> {
        loop {
            let Some(step) = saga.steps().get(index) else {
                return self.finish_success(saga).await;
            };

            info!(saga_id = saga.saga_id(), step = step.name(), "running step");
            let ctx = self.context(saga.saga_id());

            match step {
                Step::Sync(sync_step) => {
                    if let Err(err) = (sync_step.action)(ctx, step.info()).await {
                        return self
                            .fail_from(saga, index, ErrorPayload::from_error(&err))
                            .await;
                    }
                    index += 1;
                }
                Step::Async(async_step) => {
                    let payload = match (async_step.action)(ctx, step.info()).await {
                        Ok(payload) => payload,
                        Err(err) => {
                            return self
                                .fail_from(saga, index, ErrorPayload::from_error(&err))
                                .await
                        }
                    };

                    let sent = self
                        .broker
                        .send_task(
                            &async_step.queue,
                            &async_step.base_task_name,
                            saga.saga_id(),
                            &payload,
                        )
                        .await;

                    match sent {
                        Ok(message_id) => {
                            self.repository
                                .update(
                                    saga.saga_id(),
                                    StatePatch::new().with_last_message_id(Some(message_id)),
                                )
                                .await?;
                            // Suspended until a reply arrives.
                            return Ok(());
                        }
                        Err(err) => {
                            return self
                                .fail_from(saga, index, ErrorPayload::from_error(&err))
                                .await
                        }
                    }
                }
            }
        }
    }

    /// Route a reply by its topic name and drive the saga accordingly.
    pub async fn handle_reply(
        &self,
        saga: &Saga,
        task_name: &str,
        payload: Value,
    ) -> SagaResult<()> {
        if let Some(index) = saga.step_index_by_success_task_name(task_name) {
            self.on_step_success(saga, index, payload).await
        } else if let Some(index) = saga.step_index_by_failure_task_name(task_name) {
            self.on_step_failure(saga, index, payload).await
        } else {
            Err(SagaError::UnknownReplyTopic {
                task_name: task_name.to_string(),
            })
        }
    }

    async fn on_step_success(&self, saga: &Saga, index: usize, payload: Value) -> SagaResult<()> {
        let step = &saga.steps()[index];
        let Some(async_step) = step.as_async() else {
            return Err(SagaError::StepNotFound {
                step_name: step.name().to_string(),
            });
        };

        if !self
            .repository
            .try_mark_reply_handled(saga.saga_id(), step.name(), ReplyOutcome::Success)
            .await?
        {
            warn!(
                saga_id = saga.saga_id(),
                step = step.name(),
                "duplicate success reply dropped"
            );
            return Ok(());
        }

        info!(
            saga_id = saga.saga_id(),
            step = step.name(),
            "running on_success for step"
        );

        let ctx = self.context(saga.saga_id());
        if let Err(err) = (async_step.on_success)(ctx, step.info(), payload).await {
            return self
                .fail_from(saga, index, ErrorPayload::from_error(&err))
                .await;
        }

        self.run_from(saga, index + 1).await
    }

    async fn on_step_failure(&self, saga: &Saga, index: usize, payload: Value) -> SagaResult<()> {
        let step = &saga.steps()[index];
        let Some(async_step) = step.as_async() else {
            return Err(SagaError::StepNotFound {
                step_name: step.name().to_string(),
            });
        };

        if !self
            .repository
            .try_mark_reply_handled(saga.saga_id(), step.name(), ReplyOutcome::Failure)
            .await?
        {
            warn!(
                saga_id = saga.saga_id(),
                step = step.name(),
                "duplicate failure reply dropped"
            );
            return Ok(());
        }

        info!(
            saga_id = saga.saga_id(),
            step = step.name(),
            "running on_failure for step"
        );

        let details = ErrorPayload::from_value(payload.clone());

        let ctx = self.context(saga.saga_id());
        if let Err(err) = (async_step.on_failure)(ctx, step.info(), payload).await {
            warn!(
                saga_id = saga.saga_id(),
                step = step.name(),
                error = %err,
                "on_failure hook failed"
            );
        }

        self.repository
            .on_step_failure(saga.saga_id(), step.name(), &details)
            .await?;
        self.compensate(saga, index, details).await
    }

    /// Record the failure and compensate starting at the failed step. Used
    /// for failures that originate on the orchestrator side.
    async fn fail_from(&self, saga: &Saga, index: usize, details: ErrorPayload) -> SagaResult<()> {
        let step_name = saga.steps()[index].name();
        error!(
            saga_id = saga.saga_id(),
            step = step_name,
            failure_type = %details.error_type,
            "step failed on the orchestrator side"
        );

        self.repository
            .on_step_failure(saga.saga_id(), step_name, &details)
            .await?;
        self.compensate(saga, index, details).await
    }

    async fn finish_success(&self, saga: &Saga) -> SagaResult<()> {
        (saga.on_saga_success)(self.context(saga.saga_id())).await
    }

    /// Backwards, exhaustive, best-effort cascade from `from_index` down to
    /// the first step. Every compensation observes the same initial failure;
    /// a compensation error never stops the cascade.
    async fn compensate(
        &self,
        saga: &Saga,
        from_index: usize,
        initial_failure: ErrorPayload,
    ) -> SagaResult<()> {
        for index in (0..=from_index).rev() {
            let step = &saga.steps()[index];
            info!(
                saga_id = saga.saga_id(),
                step = step.name(),
                "compensating step"
            );

            let ctx = self.context(saga.saga_id());
            if let Err(err) = (step.compensation())(ctx, step.info()).await {
                warn!(
                    saga_id = saga.saga_id(),
                    step = step.name(),
                    error = %err,
                    "compensation failed, cascade continues"
                );
            }
        }

        (saga.on_saga_failure)(self.context(saga.saga_id()), initial_failure).await
    }
}
