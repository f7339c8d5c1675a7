//! Step model: the tagged sync/async step variants and their hooks.
//!
//! Hooks are first-class async closures held inside the step. Every hook
//! receives the saga context and a lightweight descriptor of its own step;
//! reply hooks additionally receive the reply payload. All hooks default to
//! no-ops.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::engine::SagaContext;
use crate::error::SagaResult;
use crate::messaging::{failure_task_name, success_task_name};

/// Hook for local work: sync step actions and all compensations.
pub type LocalAction =
    Arc<dyn Fn(SagaContext, StepInfo) -> BoxFuture<'static, SagaResult<()>> + Send + Sync>;

/// Hook that builds the outbound command payload of an async step.
pub type CommandAction =
    Arc<dyn Fn(SagaContext, StepInfo) -> BoxFuture<'static, SagaResult<Value>> + Send + Sync>;

/// Hook invoked with a success or failure reply payload.
pub type ReplyHook =
    Arc<dyn Fn(SagaContext, StepInfo, Value) -> BoxFuture<'static, SagaResult<()>> + Send + Sync>;

/// Lift a plain async fn into a [`LocalAction`].
pub fn local_action<F, Fut>(f: F) -> LocalAction
where
    F: Fn(SagaContext, StepInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SagaResult<()>> + Send + 'static,
{
    Arc::new(move |ctx, step| Box::pin(f(ctx, step)))
}

/// Lift a plain async fn into a [`CommandAction`].
pub fn command_action<F, Fut>(f: F) -> CommandAction
where
    F: Fn(SagaContext, StepInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SagaResult<Value>> + Send + 'static,
{
    Arc::new(move |ctx, step| Box::pin(f(ctx, step)))
}

/// Lift a plain async fn into a [`ReplyHook`].
pub fn reply_hook<F, Fut>(f: F) -> ReplyHook
where
    F: Fn(SagaContext, StepInfo, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SagaResult<()>> + Send + 'static,
{
    Arc::new(move |ctx, step, payload| Box::pin(f(ctx, step, payload)))
}

/// No-op local action. Common for placeholder steps whose only purpose is
/// carrying a compensation.
pub fn no_action() -> LocalAction {
    Arc::new(|_, _| Box::pin(async { Ok(()) }))
}

/// No-op reply hook.
pub fn no_reply_hook() -> ReplyHook {
    Arc::new(|_, _, _| Box::pin(async { Ok(()) }))
}

fn empty_command() -> CommandAction {
    Arc::new(|_, _| Box::pin(async { Ok(Value::Null) }))
}

/// Cloneable descriptor of a step, passed into its own hooks.
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub name: String,
    pub base_task_name: Option<String>,
    pub queue: Option<String>,
}

/// A local step: executes entirely inside the orchestrator process.
#[derive(Clone)]
pub struct SyncStep {
    pub name: String,
    pub action: LocalAction,
    pub compensation: LocalAction,
}

impl SyncStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: no_action(),
            compensation: no_action(),
        }
    }

    pub fn with_action(mut self, action: LocalAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_compensation(mut self, compensation: LocalAction) -> Self {
        self.compensation = compensation;
        self
    }
}

/// A remote step: dispatches a command to a participant and suspends the
/// saga until a reply arrives on one of the two derived reply topics.
#[derive(Clone)]
pub struct AsyncStep {
    pub name: String,
    pub base_task_name: String,
    pub queue: String,
    pub action: CommandAction,
    pub on_success: ReplyHook,
    pub on_failure: ReplyHook,
    pub compensation: LocalAction,
}

impl AsyncStep {
    pub fn new(
        name: impl Into<String>,
        base_task_name: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_task_name: base_task_name.into(),
            queue: queue.into(),
            action: empty_command(),
            on_success: no_reply_hook(),
            on_failure: no_reply_hook(),
            compensation: no_action(),
        }
    }

    pub fn with_action(mut self, action: CommandAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_on_success(mut self, hook: ReplyHook) -> Self {
        self.on_success = hook;
        self
    }

    pub fn with_on_failure(mut self, hook: ReplyHook) -> Self {
        self.on_failure = hook;
        self
    }

    pub fn with_compensation(mut self, compensation: LocalAction) -> Self {
        self.compensation = compensation;
        self
    }

    /// Derived success reply topic for this step.
    pub fn success_task_name(&self) -> String {
        success_task_name(&self.base_task_name)
    }

    /// Derived failure reply topic for this step.
    pub fn failure_task_name(&self) -> String {
        failure_task_name(&self.base_task_name)
    }
}

/// One unit of saga work.
#[derive(Clone)]
pub enum Step {
    Sync(SyncStep),
    Async(AsyncStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Sync(step) => &step.name,
            Step::Async(step) => &step.name,
        }
    }

    pub fn compensation(&self) -> &LocalAction {
        match self {
            Step::Sync(step) => &step.compensation,
            Step::Async(step) => &step.compensation,
        }
    }

    pub fn as_async(&self) -> Option<&AsyncStep> {
        match self {
            Step::Sync(_) => None,
            Step::Async(step) => Some(step),
        }
    }

    /// Descriptor handed to this step's hooks.
    pub fn info(&self) -> StepInfo {
        match self {
            Step::Sync(step) => StepInfo {
                name: step.name.clone(),
                base_task_name: None,
                queue: None,
            },
            Step::Async(step) => StepInfo {
                name: step.name.clone(),
                base_task_name: Some(step.base_task_name.clone()),
                queue: Some(step.queue.clone()),
            },
        }
    }
}

impl From<SyncStep> for Step {
    fn from(step: SyncStep) -> Self {
        Step::Sync(step)
    }
}

impl From<AsyncStep> for Step {
    fn from(step: AsyncStep) -> Self {
        Step::Async(step)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Sync(step) => f.debug_struct("SyncStep").field("name", &step.name).finish(),
            Step::Async(step) => f
                .debug_struct("AsyncStep")
                .field("name", &step.name)
                .field("base_task_name", &step.base_task_name)
                .field("queue", &step.queue)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_step_topic_derivation() {
        let step = AsyncStep::new(
            "verify consumer details",
            "consumer_service.verify_consumer_details",
            "consumer_service.commands",
        );

        assert_eq!(
            step.success_task_name(),
            "consumer_service.verify_consumer_details.response.success"
        );
        assert_eq!(
            step.failure_task_name(),
            "consumer_service.verify_consumer_details.response.failure"
        );
    }

    #[test]
    fn test_step_info_carries_routing_fields() {
        let sync: Step = SyncStep::new("approve order").into();
        let info = sync.info();
        assert_eq!(info.name, "approve order");
        assert!(info.base_task_name.is_none());

        let remote: Step = AsyncStep::new("authorize card", "accounting_service.authorize_card", "accounting_service.commands").into();
        let info = remote.info();
        assert_eq!(info.base_task_name.as_deref(), Some("accounting_service.authorize_card"));
        assert_eq!(info.queue.as_deref(), Some("accounting_service.commands"));
    }
}
