//! Saga orchestration over an asynchronous message broker.
//!
//! A saga is an ordered sequence of steps executed across independently
//! deployed services. There is no global transaction manager; atomicity is
//! emulated by pairing each step with a compensation that semantically
//! undoes it when a later step fails.
//!
//! The orchestrator side composes the [`engine::SagaEngine`] with a
//! [`repository::SagaStateRepository`] and a [`broker::MessageBroker`];
//! worker processes bind reply handlers through the
//! [`registry::SagaRegistry`]. The participant side needs only the
//! [`messaging`] naming conventions and the [`handler`] wrappers.

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod messaging;
#[cfg(feature = "database-persistence")]
pub mod persistence;
pub mod registry;
pub mod repository;
pub mod state;
pub mod step;

pub use broker::{InMemoryBroker, MessageBroker, PublishedMessage, RedisBroker, TaskHandler};
pub use config::Settings;
pub use engine::{
    failure_hook, terminal_hook, FailureHook, Saga, SagaBuilder, SagaContext, SagaEngine,
    TerminalHook, STATUS_FAILED, STATUS_SUCCEEDED,
};
pub use error::{SagaError, SagaResult};
pub use handler::{
    command_handler, compensation_step_handler, saga_step_handler, saga_step_handler_with_retry,
    CommandHandler, RetryPolicy,
};
pub use messaging::{
    failure_task_name, success_task_name, ErrorPayload, MessageEnvelope,
};
#[cfg(feature = "database-persistence")]
pub use persistence::PostgresSagaRepository;
pub use registry::{saga_factory, SagaDescriptor, SagaFactory, SagaRegistry};
pub use repository::{InMemorySagaRepository, SagaStateRepository};
pub use state::{ReplyOutcome, SagaState, StatePatch, INITIAL_STATUS};
pub use step::{
    command_action, local_action, no_action, no_reply_hook, reply_hook, AsyncStep, CommandAction,
    LocalAction, ReplyHook, Step, StepInfo, SyncStep,
};
