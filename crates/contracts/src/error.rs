//! Layered error definitions
//!
//! `ContractError` covers configuration; `OutputError` covers one delivery
//! attempt, from addressing through the final response.

use thiserror::Error;

/// Configuration and setup errors
#[derive(Debug, Error)]
pub enum ContractError {
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single delivery attempt
///
/// All variants are reported the same way; the split only shapes log
/// messages and the status string on the error metric.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Destination address could not be resolved; nothing was sent
    #[error("invalid address '{address}': {message}")]
    Address { address: String, message: String },

    /// Transport connection could not be established
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Send completed but was rejected, or the transport failed mid-send
    #[error("delivery error{}: {message}", status_suffix(.status))]
    Delivery {
        status: Option<u16>,
        message: String,
    },

    /// Event body could not be produced
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Delivery task ended without an outcome ("panic" or "cancelled")
    #[error("delivery task aborted: {0}")]
    Aborted(&'static str),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl OutputError {
    pub fn address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Address {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn delivery(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Delivery {
            status,
            message: message.into(),
        }
    }

    /// Short status string carried on the error metric event
    pub fn status_detail(&self) -> String {
        match self {
            Self::Address { .. } => "invalid_address".to_string(),
            Self::Connection { message } => message.clone(),
            Self::Delivery {
                status: Some(code), ..
            } => code.to_string(),
            Self::Delivery { status: None, .. } => "transport_error".to_string(),
            Self::Serialization(_) => "serialization_error".to_string(),
            Self::Aborted(reason) => reason.to_string(),
        }
    }
}
