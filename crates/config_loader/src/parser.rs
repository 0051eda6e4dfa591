//! Configuration parsing
//!
//! TOML (primary) and JSON.

use contracts::{ContractError, RelayConfig};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse configuration in the given format
///
/// Only the syntax and shape are checked here; rules live in `validator`.
pub(crate) fn parse(content: &str, format: ConfigFormat) -> Result<RelayConfig, ContractError> {
    let parsed: Result<RelayConfig, Box<dyn std::error::Error + Send + Sync>> = match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(Into::into),
        ConfigFormat::Json => serde_json::from_str(content).map_err(Into::into),
    };
    parsed.map_err(|e| ContractError::ConfigParse {
        message: format!("{format:?} parse error: {e}"),
        source: Some(e),
    })
}
