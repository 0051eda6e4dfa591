//! Shared HTTP client used by the HTTP-style outputs

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use tracing::debug;

use contracts::{Destination, OutputError};

use crate::error::DispatcherError;

const USER_AGENT: &str = concat!("alert-relay/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt carried in a delivery error
const MAX_ERROR_BODY: usize = 256;

/// HTTP basic credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Client settings of one HTTP output
#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    pub timeout: Duration,
    pub check_cert: bool,
    pub custom_headers: HashMap<String, String>,
}

/// One `reqwest::Client` per output, built at startup and reused
///
/// `reqwest::Client` pools connections internally and is safe to share, so
/// concurrent deliveries need no lock.
#[derive(Debug, Clone)]
pub struct HttpOutputClient {
    destination: Destination,
    client: Client,
    headers: HeaderMap,
}

impl HttpOutputClient {
    pub fn new(destination: Destination, options: &HttpClientOptions) -> Result<Self, DispatcherError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(!options.check_cert)
            .build()
            .map_err(|e| DispatcherError::output_creation(destination, e.to_string()))?;
        let headers = header_map(destination, &options.custom_headers)?;

        Ok(Self {
            destination,
            client,
            headers,
        })
    }

    /// Send `body` as JSON and map the response to a delivery result
    ///
    /// Custom headers are applied after authentication, so a configured
    /// `Authorization` header replaces the basic-auth one instead of being
    /// sent twice.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Bytes,
        auth: Option<&BasicAuth>,
    ) -> Result<(), OutputError> {
        let mut request = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        request = request.headers(self.headers.clone()).body(body);

        let response = request
            .send()
            .await
            .map_err(|e| OutputError::delivery(None, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(destination = %self.destination, status = status.as_u16(), "Request accepted");
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(OutputError::delivery(
            Some(status.as_u16()),
            error_excerpt(&text, status.canonical_reason().unwrap_or("unexpected status")),
        ))
    }
}

fn header_map(
    destination: Destination,
    custom: &HashMap<String, String>,
) -> Result<HeaderMap, DispatcherError> {
    let mut headers = HeaderMap::with_capacity(custom.len());
    for (name, value) in custom {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            DispatcherError::output_creation(destination, format!("invalid header name '{name}': {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            DispatcherError::output_creation(destination, format!("invalid value for header '{name}': {e}"))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn error_excerpt(body: &str, fallback: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return fallback.to_string();
    }
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
