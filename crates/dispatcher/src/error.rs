//! Dispatcher error types

use std::time::Duration;

use thiserror::Error;

use crate::service::ServiceState;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Operation on the placeholder before configuration completed
    #[error("metrics dispatcher has not been configured")]
    NotConfigured,

    /// Second configuration of a late-binding handle
    #[error("metrics dispatcher has already been configured")]
    AlreadyConfigured,

    /// Lifecycle operation invoked in the wrong state
    #[error("illegal state: expected {expected}, but was {actual}")]
    IllegalState {
        expected: ServiceState,
        actual: ServiceState,
    },

    /// Target state not reached in time
    #[error("timed out after {timeout:?} waiting for state {target}")]
    Timeout {
        target: ServiceState,
        timeout: Duration,
    },

    /// The start-up hook failed; the service is FAILED
    #[error("start-up failed: {0}")]
    StartUp(#[source] Box<DispatcherError>),

    /// The service reached FAILED
    #[error("service failed: {cause}")]
    Failed { cause: String },

    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Sink, serialization or configuration error (from contract)
    #[error(transparent)]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(expected: ServiceState, actual: ServiceState) -> Self {
        Self::IllegalState { expected, actual }
    }
}
