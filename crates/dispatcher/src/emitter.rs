//! MetricsEmitter - fire-and-forget metric events with an isolated worker
//!
//! Emission never blocks a delivery: events go through a bounded queue with
//! `try_send`, and a full queue drops the event and counts the drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{DeliveryOutcome, DeliveryStatus, Destination};

/// Metric category of delivery outcomes
pub const OUTPUTS_CATEGORY: &str = "outputs";

/// One counter increment destined for the metrics backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEvent {
    pub category: &'static str,
    pub delta: u64,
    pub tags: MetricTags,
    /// Status or error string, only set for failures
    pub detail: Option<String>,
}

/// Dimensions of an output metric event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricTags {
    pub destination: Destination,
    pub status: DeliveryStatus,
}

impl MetricEvent {
    /// Event counting one delivery outcome
    pub fn from_outcome(outcome: &DeliveryOutcome) -> Self {
        Self {
            category: OUTPUTS_CATEGORY,
            delta: 1,
            tags: MetricTags {
                destination: outcome.destination,
                status: outcome.status,
            },
            detail: outcome.detail.clone(),
        }
    }
}

/// Receiver of metric events, called from the worker task only
pub trait MetricsBackend: Send + Sync + 'static {
    fn record(&self, event: &MetricEvent);
}

/// Backend publishing through the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusBackend;

impl MetricsBackend for PrometheusBackend {
    fn record(&self, event: &MetricEvent) {
        observability::record_output_event(event.tags.destination, event.tags.status, event.delta);
    }
}

/// Backend discarding every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl MetricsBackend for NoopBackend {
    fn record(&self, _event: &MetricEvent) {}
}

/// Cloneable sending side of the metrics queue
#[derive(Debug, Clone)]
pub struct MetricsEmitter {
    tx: mpsc::Sender<MetricEvent>,
    dropped: Arc<AtomicU64>,
}

impl MetricsEmitter {
    /// Queue a metric event (non-blocking)
    ///
    /// Returns true if queued, false if dropped
    pub fn emit(&self, event: MetricEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(e)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                observability::record_metric_events_dropped(1);
                warn!(
                    category = e.category,
                    destination = %e.tags.destination,
                    "Metrics queue full, event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(e)) => {
                debug!(
                    category = e.category,
                    destination = %e.tags.destination,
                    "Metrics worker gone, event dropped"
                );
                false
            }
        }
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to the running metrics worker
pub struct MetricsWorker {
    handle: JoinHandle<u64>,
}

impl MetricsWorker {
    /// Spawn the worker and return the emitter feeding it
    pub fn spawn(capacity: usize, backend: Arc<dyn MetricsBackend>) -> (MetricsEmitter, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let emitter = MetricsEmitter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let handle = tokio::spawn(metrics_worker(rx, backend));
        (emitter, Self { handle })
    }

    /// Wait for the worker to drain the queue
    ///
    /// Completes once every `MetricsEmitter` clone has been dropped. Returns
    /// the number of events forwarded to the backend.
    #[instrument(name = "metrics_worker_shutdown", skip(self))]
    pub async fn shutdown(self) -> u64 {
        match self.handle.await {
            Ok(forwarded) => {
                debug!(forwarded, "Metrics worker shutdown complete");
                forwarded
            }
            Err(e) => {
                error!(error = ?e, "Metrics worker panicked");
                0
            }
        }
    }
}

async fn metrics_worker(mut rx: mpsc::Receiver<MetricEvent>, backend: Arc<dyn MetricsBackend>) -> u64 {
    debug!("Metrics worker started");
    let mut forwarded = 0;
    while let Some(event) = rx.recv().await {
        backend.record(&event);
        forwarded += 1;
    }
    debug!(forwarded, "Metrics worker stopped");
    forwarded
}
