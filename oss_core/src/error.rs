//! Errors raised by the orchestrator engine.

use oss_env::EnvError;
use thiserror::Error;

/// Orchestrator failures. Setup and environment errors are fatal to the run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An OS-level operation failed
    #[error(transparent)]
    Env(#[from] EnvError),

    /// The configuration cannot describe a valid run
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OrchestratorError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
