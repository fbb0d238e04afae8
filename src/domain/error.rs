use super::ServiceState;
use thiserror::Error;

/// Failures of a single service's lifecycle operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid service declaration: {0}")]
    InvalidSpec(String),

    #[error("cannot {operation} {container} while {state}")]
    InvalidState {
        container: String,
        operation: &'static str,
        state: ServiceState,
    },

    #[error("invalid configuration for {container}: {reason}")]
    InvalidConfig { container: String, reason: String },

    #[error("service {container} is not running")]
    NotRunning { container: String },

    #[error("could not inspect {container}")]
    Inspect {
        container: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not run {container}")]
    Launch {
        container: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("command `{command}` failed in {container}")]
    Exec {
        container: String,
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not stop {container}")]
    Stop {
        container: String,
        #[source]
        source: anyhow::Error,
    },
}
