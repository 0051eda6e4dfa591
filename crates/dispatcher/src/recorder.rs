//! OutputRecorder - the one path every delivery outcome goes through

use std::sync::Arc;

use tracing::{error, info};

use contracts::{DeliveryOutcome, Destination, OutputError};

use crate::emitter::{MetricEvent, MetricsEmitter};
use crate::stats::Stats;

/// Counters and metric emitter of one destination
#[derive(Debug, Clone)]
pub struct OutputRecorder {
    destination: Destination,
    stats: Arc<Stats>,
    emitter: MetricsEmitter,
}

impl OutputRecorder {
    pub fn new(destination: Destination, stats: Arc<Stats>, emitter: MetricsEmitter) -> Self {
        Self {
            destination,
            stats,
            emitter,
        }
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Count an attempt, before anything else is done for it
    pub fn record_attempt(&self) {
        self.stats.increment_total(self.destination);
    }

    /// Count a success and emit the "ok" metric event
    pub fn record_ok(&self) -> DeliveryOutcome {
        self.stats.increment_ok(self.destination);
        let outcome = DeliveryOutcome::ok(self.destination);
        self.emitter.emit(MetricEvent::from_outcome(&outcome));
        info!(destination = %self.destination, "Event delivered");
        outcome
    }

    /// Count a failure and emit the "error" metric event
    pub fn report_error(&self, err: &OutputError) -> DeliveryOutcome {
        self.stats.increment_error(self.destination);
        let outcome = DeliveryOutcome::error(self.destination, err.status_detail());
        self.emitter.emit(MetricEvent::from_outcome(&outcome));
        error!(destination = %self.destination, error = %err, "Delivery failed");
        outcome
    }

    /// Record whichever outcome `result` holds
    pub fn record(&self, result: &Result<(), OutputError>) -> DeliveryOutcome {
        match result {
            Ok(()) => self.record_ok(),
            Err(e) => self.report_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::MetricsWorker;
    use crate::emitter::tests::MemoryBackend;
    use contracts::DeliveryStatus;

    #[tokio::test]
    async fn test_each_attempt_counts_once() {
        let stats = Arc::new(Stats::new());
        let backend = Arc::new(MemoryBackend::default());
        let (emitter, worker) = MetricsWorker::spawn(16, backend.clone());
        let recorder = OutputRecorder::new(Destination::Elasticsearch, stats.clone(), emitter);

        recorder.record_attempt();
        let ok = recorder.record(&Ok(()));
        recorder.record_attempt();
        let failed = recorder.record(&Err(OutputError::delivery(Some(503), "unavailable")));

        assert!(ok.is_ok());
        assert_eq!(failed.detail.as_deref(), Some("503"));

        let snapshot = stats.snapshot(Destination::Elasticsearch);
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.ok, 1);
        assert_eq!(snapshot.error, 1);
        assert_eq!(stats.snapshot(Destination::Mqtt).total, 0);

        drop(recorder);
        worker.shutdown().await;
        assert_eq!(backend.count(Destination::Elasticsearch, DeliveryStatus::Ok), 1);
        assert_eq!(backend.count(Destination::Elasticsearch, DeliveryStatus::Error), 1);
    }

    #[tokio::test]
    async fn test_address_error_detail() {
        let stats = Arc::new(Stats::new());
        let (emitter, _worker) = MetricsWorker::spawn(4, Arc::new(MemoryBackend::default()));
        let recorder = OutputRecorder::new(Destination::Webhook, stats.clone(), emitter);

        recorder.record_attempt();
        let outcome = recorder.report_error(&OutputError::address("::bad", "relative URL"));

        assert_eq!(outcome.status, DeliveryStatus::Error);
        assert_eq!(outcome.detail.as_deref(), Some("invalid_address"));
        assert_eq!(stats.snapshot(Destination::Webhook).error, 1);
    }
}
