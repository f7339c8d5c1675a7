//! Error types for saga orchestration.

use thiserror::Error;

/// Convenience alias used throughout the framework.
pub type SagaResult<T> = Result<T, SagaError>;

/// Errors raised by the saga engine, the broker layer and the state store
#[derive(Error, Debug, Clone)]
pub enum SagaError {
    /// A step action or hook failed on the orchestrator side
    #[error("Step '{step_name}' failed: {reason}")]
    StepExecutionFailed { step_name: String, reason: String },

    /// A step name did not resolve against the saga's step list
    #[error("No step found with name '{step_name}'")]
    StepNotFound { step_name: String },

    /// A reply arrived on a topic no async step derives to
    #[error("No async step matches reply topic '{task_name}'")]
    UnknownReplyTopic { task_name: String },

    /// The state row for a saga id is missing
    #[error("No saga state found for saga {saga_id}")]
    SagaNotFound { saga_id: i64 },

    /// Broker publish/subscribe/consume failure
    #[error("Broker operation '{operation}' failed: {reason}")]
    BrokerError { operation: String, reason: String },

    /// State repository failure
    #[error("Repository operation '{operation}' failed: {reason}")]
    RepositoryError { operation: String, reason: String },

    /// Payload (de)serialization failure
    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },

    /// A command payload failed business validation
    #[error("Validation failed: {field}: {message}")]
    ValidationFailed { field: String, message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Generic error for catch-all cases
    #[error("Saga error: {message}")]
    Generic { message: String },
}

impl SagaError {
    /// Short error class name, used as the `type` field of a failure reply
    pub fn error_class(&self) -> &'static str {
        match self {
            SagaError::StepExecutionFailed { .. } => "StepExecutionFailed",
            SagaError::StepNotFound { .. } => "StepNotFound",
            SagaError::UnknownReplyTopic { .. } => "UnknownReplyTopic",
            SagaError::SagaNotFound { .. } => "SagaNotFound",
            SagaError::BrokerError { .. } => "BrokerError",
            SagaError::RepositoryError { .. } => "RepositoryError",
            SagaError::SerializationError { .. } => "SerializationError",
            SagaError::ValidationFailed { .. } => "ValidationFailed",
            SagaError::ConfigurationError { .. } => "ConfigurationError",
            SagaError::Generic { .. } => "Generic",
        }
    }

    /// Get error category for logging and monitoring
    pub fn category(&self) -> &'static str {
        match self {
            SagaError::StepExecutionFailed { .. } => "step_execution",
            SagaError::StepNotFound { .. } => "step_resolution",
            SagaError::UnknownReplyTopic { .. } => "reply_routing",
            SagaError::SagaNotFound { .. } => "state_management",
            SagaError::BrokerError { .. } => "broker",
            SagaError::RepositoryError { .. } => "repository",
            SagaError::SerializationError { .. } => "serialization",
            SagaError::ValidationFailed { .. } => "validation",
            SagaError::ConfigurationError { .. } => "configuration",
            SagaError::Generic { .. } => "generic",
        }
    }

    /// Check if the error is retryable at the participant layer
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::BrokerError { .. } => true,
            SagaError::RepositoryError { .. } => true,
            SagaError::StepExecutionFailed { .. } => true,
            SagaError::Generic { .. } => true,
            SagaError::StepNotFound { .. } => false,
            SagaError::UnknownReplyTopic { .. } => false,
            SagaError::SagaNotFound { .. } => false,
            SagaError::SerializationError { .. } => false,
            SagaError::ValidationFailed { .. } => false,
            SagaError::ConfigurationError { .. } => false,
        }
    }
}

impl From<serde_json::Error> for SagaError {
    fn from(err: serde_json::Error) -> Self {
        SagaError::SerializationError {
            reason: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for SagaError {
    fn from(err: redis::RedisError) -> Self {
        SagaError::BrokerError {
            operation: "redis".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for SagaError {
    fn from(err: config::ConfigError) -> Self {
        SagaError::ConfigurationError {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "database-persistence")]
impl From<sqlx::Error> for SagaError {
    fn from(err: sqlx::Error) -> Self {
        SagaError::RepositoryError {
            operation: "database".to_string(),
            reason: err.to_string(),
        }
    }
}
