//! WebhookOutput - sends the event body to an arbitrary HTTP endpoint

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Method, Url};

use contracts::{Destination, HttpMethod, Output, OutputError, Priority, SecurityEvent, WebhookConfig};

use crate::error::DispatcherError;
use crate::http::{HttpClientOptions, HttpOutputClient};

pub struct WebhookOutput {
    address: String,
    method: Method,
    minimum_priority: Priority,
    client: HttpOutputClient,
}

impl WebhookOutput {
    pub fn new(config: &WebhookConfig) -> Result<Self, DispatcherError> {
        let client = HttpOutputClient::new(
            Destination::Webhook,
            &HttpClientOptions {
                timeout: Duration::from_millis(config.timeout_ms),
                check_cert: config.check_cert,
                custom_headers: config.custom_headers.clone(),
            },
        )?;
        let method = match config.method {
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
        };

        Ok(Self {
            address: config.address.clone(),
            method,
            minimum_priority: config.minimum_priority,
            client,
        })
    }
}

impl Output for WebhookOutput {
    fn destination(&self) -> Destination {
        Destination::Webhook
    }

    fn minimum_priority(&self) -> Priority {
        self.minimum_priority
    }

    async fn send(&self, _event: &SecurityEvent, body: &Bytes) -> Result<(), OutputError> {
        let url = Url::parse(&self.address)
            .map_err(|e| OutputError::address(&self.address, e.to_string()))?;
        self.client
            .send(self.method.clone(), url, body.clone(), None)
            .await
    }

    async fn close(&self) -> Result<(), OutputError> {
        Ok(())
    }
}
