//! # Dispatcher
//!
//! Output fan-out.
//!
//! Responsibilities:
//! - Deliver each `SecurityEvent` to every enabled output
//! - Record exactly one outcome per attempt in `Stats`
//! - Keep slow or failing outputs from affecting the others

pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod http;
pub mod outputs;
pub mod recorder;
pub mod stats;

pub use contracts::{Output, SecurityEvent};
pub use dispatcher::{DispatchSummary, Dispatcher, DispatcherBuilder, create_dispatcher};
pub use emitter::{
    MetricEvent, MetricTags, MetricsBackend, MetricsEmitter, MetricsWorker, NoopBackend,
    PrometheusBackend,
};
pub use error::DispatcherError;
pub use http::{BasicAuth, HttpClientOptions, HttpOutputClient};
pub use outputs::{
    BrokerTransport, ConnectionState, ElasticsearchOutput, MqttOutput, OutputAdapter,
    RumqttTransport, WebhookOutput, index_url,
};
pub use recorder::OutputRecorder;
pub use stats::{OutputStats, Stats, StatsSnapshot};
