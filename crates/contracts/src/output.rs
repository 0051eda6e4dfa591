//! Output trait - Dispatcher delivery interface
//!
//! Defines the contract every destination adapter implements.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{OutputError, Priority, SecurityEvent};

/// Destination types known to the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Elasticsearch,
    Mqtt,
    Webhook,
}

impl Destination {
    /// All destination types, in stats/reporting order
    pub const ALL: [Destination; 3] = [Self::Elasticsearch, Self::Mqtt, Self::Webhook];

    /// Stable lowercase name (log field, stats key, metric label)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "elasticsearch",
            Self::Mqtt => "mqtt",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result status of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Ok,
    Error,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one delivery attempt, consumed by the stats recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub destination: Destination,
    pub status: DeliveryStatus,
    /// Error detail, only set for failures
    pub detail: Option<String>,
}

impl DeliveryOutcome {
    pub fn ok(destination: Destination) -> Self {
        Self {
            destination,
            status: DeliveryStatus::Ok,
            detail: None,
        }
    }

    pub fn error(destination: Destination, detail: impl Into<String>) -> Self {
        Self {
            destination,
            status: DeliveryStatus::Error,
            detail: Some(detail.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == DeliveryStatus::Ok
    }
}

/// Destination adapter
///
/// `send` covers addressing, connecting, authenticating and sending. Counting
/// and metric emission happen around it in the dispatcher so that every
/// attempt is recorded exactly once whatever `send` does.
#[trait_variant::make(Output: Send)]
pub trait LocalOutput {
    /// Destination type of this adapter
    fn destination(&self) -> Destination;

    /// Lowest event priority this adapter accepts
    fn minimum_priority(&self) -> Priority;

    /// Deliver one event
    ///
    /// `body` is the event's serialized form, shared by all adapters.
    ///
    /// # Errors
    /// Any addressing, connection or delivery failure
    async fn send(&self, event: &SecurityEvent, body: &Bytes) -> Result<(), OutputError>;

    /// Release transport resources at shutdown
    async fn close(&self) -> Result<(), OutputError>;
}
