//! Configuration validation
//!
//! Rules:
//! - field-level checks declared on the config structs (`validator` derive)
//! - elasticsearch host is an absolute http(s) URL
//! - elasticsearch index names are lowercase
//! - mqtt broker URI is parseable with a supported scheme
//! - mqtt publish topic carries no wildcard
//! - webhook address is an absolute http(s) URL
//!
//! Disabled sections are not validated.

use contracts::{ContractError, RelayConfig};
use url::Url;
use validator::Validate;

/// Validate a RelayConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &RelayConfig) -> Result<(), ContractError> {
    validate_fields("metrics", &config.metrics)?;
    validate_elasticsearch(config)?;
    validate_mqtt(config)?;
    validate_webhook(config)?;
    Ok(())
}

fn validate_fields(section: &str, value: &impl Validate) -> Result<(), ContractError> {
    value
        .validate()
        .map_err(|e| ContractError::config_validation(section, e.to_string()))
}

fn validate_elasticsearch(config: &RelayConfig) -> Result<(), ContractError> {
    let Some(es) = config.outputs.elasticsearch.as_ref().filter(|c| c.enabled) else {
        return Ok(());
    };

    validate_fields("outputs.elasticsearch", es)?;
    require_http_url("outputs.elasticsearch.host_port", &es.host_port)?;

    if es.index.chars().any(|c| c.is_uppercase()) {
        return Err(ContractError::config_validation(
            "outputs.elasticsearch.index",
            format!("index '{}' must be lowercase", es.index),
        ));
    }
    Ok(())
}

fn validate_mqtt(config: &RelayConfig) -> Result<(), ContractError> {
    let Some(mqtt) = config.outputs.mqtt.as_ref().filter(|c| c.enabled) else {
        return Ok(());
    };

    validate_fields("outputs.mqtt", mqtt)?;
    mqtt.broker_address()?;

    if mqtt.topic.contains(['+', '#']) {
        return Err(ContractError::config_validation(
            "outputs.mqtt.topic",
            format!("topic '{}' cannot contain wildcards", mqtt.topic),
        ));
    }
    Ok(())
}

fn validate_webhook(config: &RelayConfig) -> Result<(), ContractError> {
    let Some(webhook) = config.outputs.webhook.as_ref().filter(|c| c.enabled) else {
        return Ok(());
    };

    validate_fields("outputs.webhook", webhook)?;
    require_http_url("outputs.webhook.address", &webhook.address)
}

/// `host:port` alone parses as a URL with the host as scheme, so check it
fn require_http_url(field: &str, value: &str) -> Result<(), ContractError> {
    let url = Url::parse(value).map_err(|e| ContractError::config_validation(field, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ContractError::config_validation(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(())
}
