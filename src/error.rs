//! Top-level error types for the agent
//!
//! Each layer has its own error enum; `AgentError` is what bootstrap and
//! `main` see. Once the control loop runs, errors are logged and recovered
//! from, never returned.

use crate::actuator::ActuatorError;
use crate::config::ConfigError;
use crate::link::LinkError;
use crate::sensor::SensorError;
use crate::transport::MqttError;
use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Radio initialization failed: {0}")]
    RadioInit(#[source] LinkError),

    #[error("Initial wireless connection failed: {0}")]
    InitialLink(#[source] LinkError),

    #[error("Broker resolution could not be started: {0}")]
    ResolveDispatch(#[source] MqttError),

    #[error("Transport error: {0}")]
    TransportError(#[from] MqttError),

    #[error("Sensor error: {0}")]
    SensorError(#[from] SensorError),

    #[error("Actuator error: {0}")]
    ActuatorError(#[from] ActuatorError),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl AgentError {
    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// True for failures that happen before the loop starts and end the process
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            AgentError::ConfigError(_)
                | AgentError::RadioInit(_)
                | AgentError::InitialLink(_)
                | AgentError::ResolveDispatch(_)
        )
    }
}

/// Result type for Agent operations
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let error: AgentError = ConfigError::InvalidTopic("a/#".to_string()).into();
        assert!(matches!(error, AgentError::ConfigError(_)));
        assert!(error.is_startup_failure());
    }

    #[test]
    fn test_startup_errors_name_their_stage() {
        let error = AgentError::InitialLink(LinkError::Timeout {
            ssid: "CLEUDO".to_string(),
            timeout_ms: 10_000,
        });
        assert!(error.to_string().contains("Initial wireless connection failed"));
        assert!(error.to_string().contains("CLEUDO"));

        let error =
            AgentError::ResolveDispatch(MqttError::ResolveFailed("no resolver".to_string()));
        assert!(error.is_startup_failure());
    }

    #[test]
    fn test_runtime_errors_are_not_startup_failures() {
        let error: AgentError = SensorError::Bus("nack".to_string()).into();
        assert!(!error.is_startup_failure());

        let error = AgentError::internal_error("boom");
        assert_eq!(error.to_string(), "Internal error: boom");
    }
}
