//! ElasticsearchOutput - indexes each event as one document

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Method, Url};
use tracing::{debug, instrument};

use contracts::{
    Destination, ElasticsearchConfig, IndexSuffix, Output, OutputError, Priority, SecurityEvent,
};

use crate::error::DispatcherError;
use crate::http::{BasicAuth, HttpClientOptions, HttpOutputClient};

/// Output posting events to an Elasticsearch index
pub struct ElasticsearchOutput {
    config: ElasticsearchConfig,
    auth: Option<BasicAuth>,
    client: HttpOutputClient,
}

impl ElasticsearchOutput {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self, DispatcherError> {
        let client = HttpOutputClient::new(
            Destination::Elasticsearch,
            &HttpClientOptions {
                timeout: Duration::from_millis(config.timeout_ms),
                check_cert: config.check_cert,
                custom_headers: config.custom_headers.clone(),
            },
        )?;

        Ok(Self {
            auth: config.credentials().map(|(user, password)| BasicAuth::new(user, password)),
            config: config.clone(),
            client,
        })
    }

    /// Target URL for a document indexed at `now`
    pub fn document_url(&self, now: DateTime<Utc>) -> Result<Url, OutputError> {
        index_url(
            &self.config.host_port,
            &self.config.index,
            &self.config.doc_type,
            self.config.suffix,
            now,
        )
    }
}

/// Build `<host_port>/<index>[-<date>]/<type>`
///
/// The date part follows `suffix`: `none` adds nothing, `monthly` adds
/// `YYYY.MM`, `annually` adds `YYYY` and `daily` adds `YYYY.MM.DD`.
pub fn index_url(
    host_port: &str,
    index: &str,
    doc_type: &str,
    suffix: IndexSuffix,
    now: DateTime<Utc>,
) -> Result<Url, OutputError> {
    let index = match suffix {
        IndexSuffix::None => index.to_string(),
        IndexSuffix::Monthly => format!("{index}-{}", now.format("%Y.%m")),
        IndexSuffix::Annually => format!("{index}-{}", now.format("%Y")),
        IndexSuffix::Daily => format!("{index}-{}", now.format("%Y.%m.%d")),
    };
    let raw = format!("{}/{index}/{doc_type}", host_port.trim_end_matches('/'));

    Url::parse(&raw).map_err(|e| OutputError::address(raw, e.to_string()))
}

impl Output for ElasticsearchOutput {
    fn destination(&self) -> Destination {
        Destination::Elasticsearch
    }

    fn minimum_priority(&self) -> Priority {
        self.config.minimum_priority
    }

    #[instrument(name = "elasticsearch_send", skip_all, fields(uuid = %event.uuid))]
    async fn send(&self, event: &SecurityEvent, body: &Bytes) -> Result<(), OutputError> {
        let url = self.document_url(Utc::now())?;
        debug!(url = %url, "Indexing event");
        self.client
            .send(Method::POST, url, body.clone(), self.auth.as_ref())
            .await
    }

    async fn close(&self) -> Result<(), OutputError> {
        Ok(())
    }
}
