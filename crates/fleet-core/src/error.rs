//! Fleet error types.

use thiserror::Error;

use crate::types::InstanceState;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors that can abort a fleet operation.
///
/// None of these are retried by the caller. Retries happen inside the
/// readiness prober, and only the exhausted outcome surfaces here.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("timed out waiting for instance {instance} to reach state '{state}'")]
    ProvisioningTimeout {
        instance: String,
        state: InstanceState,
    },

    #[error("failed to connect to '{host}'")]
    ReachabilityTimeout { host: String },

    #[error("needed {needed} running instances but only {available} are available")]
    Capacity { needed: usize, available: usize },

    #[error("cloud provider error: {0}")]
    Provider(String),

    #[error("remote command failed on {host}: {message}")]
    Remote { host: String, message: String },

    #[error("missing output: {0}")]
    MissingOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub fn config(msg: impl Into<String>) -> Self {
        FleetError::Configuration(msg.into())
    }

    pub fn remote(host: &str, msg: impl Into<String>) -> Self {
        FleetError::Remote {
            host: host.to_string(),
            message: msg.into(),
        }
    }
}
