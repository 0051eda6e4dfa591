//! Output implementations

mod elasticsearch;
mod mqtt;
mod webhook;

pub use elasticsearch::{ElasticsearchOutput, index_url};
pub use mqtt::{
    BrokerTransport, ConnectionState, LocalBrokerTransport, MqttOutput, RumqttTransport,
    qos_from_level,
};
pub use webhook::WebhookOutput;

use bytes::Bytes;
use tracing::{info, instrument};

use contracts::{Destination, Output, OutputError, OutputsConfig, Priority, SecurityEvent};

use crate::error::DispatcherError;

/// Every destination the relay can deliver to
pub enum OutputAdapter {
    Elasticsearch(ElasticsearchOutput),
    Mqtt(MqttOutput),
    Webhook(WebhookOutput),
}

impl OutputAdapter {
    /// Build one adapter per enabled destination
    ///
    /// # Errors
    /// The first destination whose configuration cannot be turned into a client
    #[instrument(name = "outputs_from_config", skip(config))]
    pub fn from_config(config: &OutputsConfig) -> Result<Vec<Self>, DispatcherError> {
        let mut adapters = Vec::new();

        if let Some(es) = config.elasticsearch.as_ref().filter(|c| c.enabled) {
            adapters.push(Self::Elasticsearch(ElasticsearchOutput::new(es)?));
        }
        if let Some(mqtt) = config.mqtt.as_ref().filter(|c| c.enabled) {
            adapters.push(Self::Mqtt(MqttOutput::new(mqtt)?));
        }
        if let Some(webhook) = config.webhook.as_ref().filter(|c| c.enabled) {
            adapters.push(Self::Webhook(WebhookOutput::new(webhook)?));
        }

        for adapter in &adapters {
            info!(
                destination = %adapter.destination(),
                minimum_priority = %adapter.minimum_priority(),
                "Output enabled"
            );
        }
        Ok(adapters)
    }
}

impl Output for OutputAdapter {
    fn destination(&self) -> Destination {
        match self {
            Self::Elasticsearch(o) => o.destination(),
            Self::Mqtt(o) => o.destination(),
            Self::Webhook(o) => o.destination(),
        }
    }

    fn minimum_priority(&self) -> Priority {
        match self {
            Self::Elasticsearch(o) => o.minimum_priority(),
            Self::Mqtt(o) => o.minimum_priority(),
            Self::Webhook(o) => o.minimum_priority(),
        }
    }

    async fn send(&self, event: &SecurityEvent, body: &Bytes) -> Result<(), OutputError> {
        match self {
            Self::Elasticsearch(o) => o.send(event, body).await,
            Self::Mqtt(o) => o.send(event, body).await,
            Self::Webhook(o) => o.send(event, body).await,
        }
    }

    async fn close(&self) -> Result<(), OutputError> {
        match self {
            Self::Elasticsearch(o) => o.close().await,
            Self::Mqtt(o) => o.close().await,
            Self::Webhook(o) => o.close().await,
        }
    }
}
