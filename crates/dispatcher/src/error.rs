//! Dispatcher error types

use contracts::Destination;
use thiserror::Error;

/// Startup errors; delivery failures are `OutputError`s and never surface here
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Output could not be built from its configuration
    #[error("failed to create output '{destination}': {message}")]
    OutputCreation {
        destination: Destination,
        message: String,
    },

    /// Invalid configuration (from contract)
    #[error("config error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    /// Create an output creation error
    pub fn output_creation(destination: Destination, message: impl Into<String>) -> Self {
        Self::OutputCreation {
            destination,
            message: message.into(),
        }
    }
}
