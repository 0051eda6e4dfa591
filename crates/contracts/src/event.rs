//! SecurityEvent - normalized event handed to the dispatcher
//!
//! Produced upstream, never mutated by outputs. Every output sends the same
//! serialized body, built once per dispatch.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Event severity, ordered from lowest (`Debug`) to highest (`Emergency`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    #[default]
    Debug,
    Informational,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Priority {
    /// Canonical name as carried in event payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Informational => "Informational",
            Self::Notice => "Notice",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
            Self::Alert => "Alert",
            Self::Emergency => "Emergency",
        }
    }

    /// Lenient parse: case-insensitive, accepts short aliases, unknown → `Debug`
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "emergency" => Ok(Self::Emergency),
            "alert" => Ok(Self::Alert),
            "critical" => Ok(Self::Critical),
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "notice" => Ok(Self::Notice),
            "informational" | "info" => Ok(Self::Informational),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Priority {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&s))
    }
}

/// Normalized security event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Event identifier (generated when the producer omits it)
    #[serde(default = "new_event_uuid")]
    pub uuid: String,

    /// Rendered output line
    pub output: String,

    /// Severity
    pub priority: Priority,

    /// Rule that fired
    pub rule: String,

    /// Event time
    pub time: DateTime<Utc>,

    /// Event source (e.g. "syscalls", "k8s_audit")
    #[serde(default = "default_source")]
    pub source: String,

    /// Host the event originated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Rule tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Structured fields extracted by the rule
    #[serde(default)]
    pub output_fields: Map<String, Value>,
}

fn new_event_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_source() -> String {
    "syscalls".to_string()
}

impl SecurityEvent {
    /// Create an event with the mandatory fields, stamped now
    pub fn new(
        rule: impl Into<String>,
        priority: Priority,
        output: impl Into<String>,
    ) -> Self {
        Self {
            uuid: new_event_uuid(),
            output: output.into(),
            priority,
            rule: rule.into(),
            time: Utc::now(),
            source: default_source(),
            hostname: None,
            tags: Vec::new(),
            output_fields: Map::new(),
        }
    }

    /// Event used to check connectivity of every configured output
    pub fn test_event() -> Self {
        let mut event = Self::new(
            "Test rule",
            Priority::Debug,
            "This is a test from alert-relay",
        );
        event.source = "debug".to_string();
        event.tags = vec!["test".to_string(), "example".to_string()];
        event
            .output_fields
            .insert("proc.name".to_string(), Value::from("alert-relay"));
        event
            .output_fields
            .insert("user.name".to_string(), Value::from("alert-relay"));
        event
    }

    /// Serialize to the JSON body shared by all outputs
    pub fn to_json_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
