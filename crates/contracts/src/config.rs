//! RelayConfig - Config Loader output
//!
//! One optional section per destination type. A section becomes an output
//! only when it is present and enabled. Immutable after startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;
use validator::Validate;

use crate::{ContractError, Destination, Priority};

/// Complete relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Destination settings
    #[serde(default)]
    pub outputs: OutputsConfig,

    /// Metric emission settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Per-destination sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputsConfig {
    #[serde(default)]
    pub elasticsearch: Option<ElasticsearchConfig>,

    #[serde(default)]
    pub mqtt: Option<MqttConfig>,

    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl OutputsConfig {
    /// Destinations that will get an output at startup
    pub fn enabled_destinations(&self) -> Vec<Destination> {
        let mut enabled = Vec::new();
        if self.elasticsearch.as_ref().is_some_and(|c| c.enabled) {
            enabled.push(Destination::Elasticsearch);
        }
        if self.mqtt.as_ref().is_some_and(|c| c.enabled) {
            enabled.push(Destination::Mqtt);
        }
        if self.webhook.as_ref().is_some_and(|c| c.enabled) {
            enabled.push(Destination::Webhook);
        }
        enabled
    }
}

/// Metric channel settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MetricsConfig {
    /// Capacity of the metric event queue; events beyond it are dropped
    #[serde(default = "default_metrics_queue_capacity")]
    #[validate(range(min = 1, message = "queue_capacity must be > 0"))]
    pub queue_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_metrics_queue_capacity(),
        }
    }
}

fn default_metrics_queue_capacity() -> usize {
    1024
}

/// Index name suffix policy
///
/// Any unrecognized value falls back to `Daily`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IndexSuffix {
    /// Static index name
    None,
    /// `index-YYYY.MM`
    Monthly,
    /// `index-YYYY`
    Annually,
    /// `index-YYYY.MM.DD`
    #[default]
    Daily,
}

impl From<String> for IndexSuffix {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "monthly" => Self::Monthly,
            "annually" => Self::Annually,
            _ => Self::Daily,
        }
    }
}

impl From<IndexSuffix> for String {
    fn from(suffix: IndexSuffix) -> Self {
        suffix.to_string()
    }
}

impl fmt::Display for IndexSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Monthly => "monthly",
            Self::Annually => "annually",
            Self::Daily => "daily",
        };
        f.write_str(name)
    }
}

/// Elasticsearch output
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Base URL, e.g. `http://localhost:9200`
    #[validate(length(min = 1, message = "host_port cannot be empty"))]
    pub host_port: String,

    #[serde(default = "default_index")]
    #[validate(length(min = 1, message = "index cannot be empty"))]
    pub index: String,

    /// Document type path segment
    #[serde(rename = "type", default = "default_doc_type")]
    #[validate(length(min = 1, message = "type cannot be empty"))]
    pub doc_type: String,

    #[serde(default)]
    pub suffix: IndexSuffix,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    /// Verify the server TLS certificate
    #[serde(default = "default_check_cert")]
    pub check_cert: bool,

    #[serde(default)]
    pub minimum_priority: Priority,

    /// HTTP client timeout
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1, message = "timeout_ms must be > 0"))]
    pub timeout_ms: u64,
}

/// MQTT output
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MqttConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Broker URI, e.g. `tcp://localhost:1883` or `ssl://broker:8883`
    #[validate(length(min = 1, message = "broker cannot be empty"))]
    pub broker: String,

    #[serde(default = "default_topic")]
    #[validate(length(min = 1, message = "topic cannot be empty"))]
    pub topic: String,

    /// Quality of service level (0, 1 or 2)
    #[serde(default)]
    #[validate(range(max = 2, message = "qos must be 0, 1 or 2"))]
    pub qos: u8,

    #[serde(default)]
    pub retained: bool,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Verify the broker TLS certificate
    #[serde(default = "default_check_cert")]
    pub check_cert: bool,

    #[serde(default = "default_keep_alive_secs")]
    #[validate(range(min = 1, message = "keep_alive_secs must be > 0"))]
    pub keep_alive_secs: u64,

    #[serde(default)]
    pub minimum_priority: Priority,
}

impl MqttConfig {
    /// Parse the broker URI into host, port and transport security
    ///
    /// # Errors
    /// Malformed URI, missing host or unsupported scheme
    pub fn broker_address(&self) -> Result<BrokerAddress, ContractError> {
        BrokerAddress::parse(&self.broker)
    }

    /// Credentials, only when both user and password are non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        credential_pair(self.user.as_deref(), self.password.as_deref())
    }
}

impl ElasticsearchConfig {
    /// Credentials, only when both username and password are non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        credential_pair(self.username.as_deref(), self.password.as_deref())
    }
}

fn credential_pair<'a>(user: Option<&'a str>, password: Option<&'a str>) -> Option<(&'a str, &'a str)> {
    match (user, password) {
        (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
            Some((user, password))
        }
        _ => None,
    }
}

/// Resolved MQTT broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `tcp://`, `mqtt://` (plain) or `ssl://`, `tls://`, `mqtts://` (TLS) URIs
    pub fn parse(uri: &str) -> Result<Self, ContractError> {
        let url = Url::parse(uri)
            .map_err(|e| ContractError::config_validation("outputs.mqtt.broker", e.to_string()))?;

        let (tls, default_port) = match url.scheme() {
            "tcp" | "mqtt" => (false, 1883),
            "ssl" | "tls" | "mqtts" => (true, 8883),
            other => {
                return Err(ContractError::config_validation(
                    "outputs.mqtt.broker",
                    format!("unsupported scheme '{other}'"),
                ))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ContractError::config_validation("outputs.mqtt.broker", "missing host"))?;

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(default_port),
            tls,
        })
    }
}

/// HTTP method for the webhook output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
}

/// Generic webhook output
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WebhookConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[validate(length(min = 1, message = "address cannot be empty"))]
    pub address: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    #[serde(default = "default_check_cert")]
    pub check_cert: bool,

    #[serde(default)]
    pub minimum_priority: Priority,

    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1, message = "timeout_ms must be > 0"))]
    pub timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_check_cert() -> bool {
    true
}

fn default_index() -> String {
    "falco".to_string()
}

fn default_doc_type() -> String {
    "_doc".to_string()
}

fn default_topic() -> String {
    "falco/events".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_parsing() {
        assert_eq!(IndexSuffix::from("none".to_string()), IndexSuffix::None);
        assert_eq!(IndexSuffix::from("Monthly".to_string()), IndexSuffix::Monthly);
        assert_eq!(IndexSuffix::from("annually".to_string()), IndexSuffix::Annually);
        assert_eq!(IndexSuffix::from("daily".to_string()), IndexSuffix::Daily);
        assert_eq!(IndexSuffix::from("weekly".to_string()), IndexSuffix::Daily);
    }

    #[test]
    fn test_elasticsearch_defaults() {
        let config: ElasticsearchConfig =
            serde_json::from_str(r#"{ "host_port": "http://es:9200" }"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.index, "falco");
        assert_eq!(config.doc_type, "_doc");
        assert_eq!(config.suffix, IndexSuffix::Daily);
        assert!(config.check_cert);
        assert_eq!(config.minimum_priority, Priority::Debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mqtt_qos_out_of_range() {
        let config: MqttConfig =
            serde_json::from_str(r#"{ "broker": "tcp://localhost:1883", "qos": 3 }"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("qos"), "got: {err}");
    }

    #[test]
    fn test_broker_address_parsing() {
        let plain = BrokerAddress::parse("tcp://localhost:1884").unwrap();
        assert_eq!(plain.host, "localhost");
        assert_eq!(plain.port, 1884);
        assert!(!plain.tls);

        let secure = BrokerAddress::parse("ssl://broker.example.com").unwrap();
        assert_eq!(secure.port, 8883);
        assert!(secure.tls);

        assert!(BrokerAddress::parse("http://broker:1883").is_err());
        assert!(BrokerAddress::parse("not a uri").is_err());
    }

    #[test]
    fn test_credentials_are_pairwise() {
        let mut config: MqttConfig =
            serde_json::from_str(r#"{ "broker": "tcp://localhost:1883", "user": "relay" }"#)
                .unwrap();
        assert_eq!(config.credentials(), None);

        config.password = Some(String::new());
        assert_eq!(config.credentials(), None);

        config.password = Some("secret".to_string());
        assert_eq!(config.credentials(), Some(("relay", "secret")));
    }

    #[test]
    fn test_enabled_destinations() {
        let outputs: OutputsConfig = serde_json::from_str(
            r#"{
                "elasticsearch": { "host_port": "http://es:9200" },
                "mqtt": { "broker": "tcp://localhost:1883", "enabled": false },
                "webhook": { "address": "http://hook.local/events", "method": "put" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            outputs.enabled_destinations(),
            vec![Destination::Elasticsearch, Destination::Webhook]
        );
        assert_eq!(outputs.webhook.unwrap().method, HttpMethod::Put);
    }
}
