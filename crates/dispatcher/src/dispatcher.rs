//! Dispatcher - fans each event out to every enabled output

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use contracts::{DeliveryOutcome, Destination, Output, OutputError, RelayConfig, SecurityEvent};

use crate::emitter::{MetricsBackend, MetricsEmitter, MetricsWorker, PrometheusBackend};
use crate::error::DispatcherError;
use crate::outputs::OutputAdapter;
use crate::recorder::OutputRecorder;
use crate::stats::{Stats, StatsSnapshot};

/// Events `run` keeps in flight before waiting for the oldest to finish
const MAX_IN_FLIGHT_EVENTS: usize = 64;

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: RelayConfig,
    stats: Option<Arc<Stats>>,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl DispatcherBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            stats: None,
            backend: None,
        }
    }

    /// Share counters with the caller instead of creating fresh ones
    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Replace the default Prometheus backend
    pub fn with_metrics_backend(mut self, backend: Arc<dyn MetricsBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build every enabled output and start the metrics worker
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Any output whose configuration cannot be turned into a client
    #[instrument(name = "dispatcher_builder_build", skip(self))]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let adapters = OutputAdapter::from_config(&self.config.outputs)?;
        if adapters.is_empty() {
            warn!("No output enabled, events will be discarded");
        }

        let stats = self.stats.unwrap_or_default();
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(PrometheusBackend));
        let (emitter, worker) = MetricsWorker::spawn(self.config.metrics.queue_capacity, backend);

        let mut dispatcher = Dispatcher::with_outputs(adapters, stats, emitter);
        dispatcher.metrics_worker = Some(worker);
        Ok(dispatcher)
    }
}

struct OutputEntry<O> {
    output: Arc<O>,
    recorder: OutputRecorder,
}

/// Per-event tally returned by `Dispatcher::dispatch`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Outputs invoked
    pub attempted: usize,
    pub ok: usize,
    pub error: usize,
    /// Outputs filtered out by their minimum priority
    pub skipped: usize,
}

/// The main Dispatcher that fans out events to outputs
pub struct Dispatcher<O = OutputAdapter> {
    outputs: Vec<OutputEntry<O>>,
    stats: Arc<Stats>,
    metrics_worker: Option<MetricsWorker>,
}

impl<O> Dispatcher<O>
where
    O: Output + Sync + 'static,
{
    /// Create a dispatcher over prebuilt outputs
    ///
    /// The caller owns the metrics worker behind `emitter`.
    pub fn with_outputs(outputs: Vec<O>, stats: Arc<Stats>, emitter: MetricsEmitter) -> Self {
        let outputs = outputs
            .into_iter()
            .map(|output| OutputEntry {
                recorder: OutputRecorder::new(output.destination(), Arc::clone(&stats), emitter.clone()),
                output: Arc::new(output),
            })
            .collect();

        Self {
            outputs,
            stats,
            metrics_worker: None,
        }
    }

    /// Destinations with an output, in delivery order
    pub fn destinations(&self) -> Vec<Destination> {
        self.outputs.iter().map(|e| e.output.destination()).collect()
    }

    /// Shared counters
    pub fn stats_handle(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot of the counters of every enabled output
    pub fn stats(&self) -> Vec<(Destination, StatsSnapshot)> {
        self.outputs
            .iter()
            .map(|e| {
                let destination = e.output.destination();
                (destination, self.stats.snapshot(destination))
            })
            .collect()
    }

    /// Publish the counters as gauges
    pub fn export_stats(&self) {
        for (destination, snapshot) in self.stats() {
            observability::record_output_stats(destination, snapshot.total, snapshot.ok, snapshot.error);
        }
    }

    /// Deliver one event to every output that accepts its priority
    ///
    /// Each delivery runs in its own task and is recorded as soon as it
    /// finishes, so a slow output never holds back another's counters.
    /// Returns once every delivery has an outcome.
    #[instrument(
        name = "dispatcher_dispatch",
        skip_all,
        fields(uuid = %event.uuid, rule = %event.rule, priority = %event.priority)
    )]
    pub async fn dispatch(&self, event: SecurityEvent) -> DispatchSummary {
        let eligible: Vec<&OutputEntry<O>> = self
            .outputs
            .iter()
            .filter(|e| event.priority >= e.output.minimum_priority())
            .collect();

        let mut summary = DispatchSummary {
            skipped: self.outputs.len() - eligible.len(),
            ..Default::default()
        };
        if eligible.is_empty() {
            debug!("No output accepts this event");
            return summary;
        }
        observability::record_event_dispatched(eligible.len());

        let body = match event.to_json_bytes() {
            Ok(body) => body,
            Err(e) => {
                let err = OutputError::Serialization(e.to_string());
                for entry in eligible {
                    entry.recorder.record_attempt();
                    entry.recorder.report_error(&err);
                    summary.attempted += 1;
                    summary.error += 1;
                }
                return summary;
            }
        };

        let event = Arc::new(event);
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        for entry in eligible {
            entry.recorder.record_attempt();
            summary.attempted += 1;
            // detached so the outcome is recorded even if this future is dropped
            tokio::spawn(deliver(
                Arc::clone(&entry.output),
                entry.recorder.clone(),
                Arc::clone(&event),
                body.clone(),
                outcome_tx.clone(),
            ));
        }
        drop(outcome_tx);

        while let Some(outcome) = outcome_rx.recv().await {
            if outcome.is_ok() {
                summary.ok += 1;
            } else {
                summary.error += 1;
            }
        }
        let missing = summary.attempted - summary.ok - summary.error;
        if missing > 0 {
            // deliver() always reports; only runtime shutdown gets here
            error!(missing, "Delivery supervisor aborted");
            summary.error += missing;
        }

        debug!(
            attempted = summary.attempted,
            ok = summary.ok,
            error = summary.error,
            "Event dispatched"
        );
        summary
    }

    /// Run the dispatcher main loop
    ///
    /// Consumes events until the input channel is closed, then shuts down.
    /// Returns the final counters.
    #[instrument(name = "dispatcher_run", skip_all)]
    pub async fn run(self, mut input_rx: mpsc::Receiver<SecurityEvent>) -> Vec<(Destination, StatsSnapshot)> {
        info!(outputs = self.outputs.len(), "Dispatcher started");

        let this = Arc::new(self);
        let mut in_flight = JoinSet::new();
        let mut event_count: u64 = 0;

        while let Some(event) = input_rx.recv().await {
            event_count += 1;
            if in_flight.len() >= MAX_IN_FLIGHT_EVENTS {
                in_flight.join_next().await;
            }
            let dispatcher = Arc::clone(&this);
            in_flight.spawn(async move { dispatcher.dispatch(event).await });

            if event_count.is_multiple_of(100) {
                debug!(events = event_count, "Dispatcher progress");
                this.export_stats();
            }
        }
        while in_flight.join_next().await.is_some() {}

        info!(events = event_count, "Dispatcher input closed, shutting down");

        match Arc::try_unwrap(this) {
            Ok(dispatcher) => dispatcher.shutdown().await,
            Err(this) => {
                error!("Dispatcher still shared at shutdown, skipping output close");
                this.stats()
            }
        }
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self, input_rx: mpsc::Receiver<SecurityEvent>) -> JoinHandle<Vec<(Destination, StatsSnapshot)>> {
        tokio::spawn(self.run(input_rx))
    }

    /// Close every output and drain the metrics worker
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(self) -> Vec<(Destination, StatsSnapshot)> {
        for entry in &self.outputs {
            if let Err(e) = entry.output.close().await {
                warn!(destination = %entry.output.destination(), error = %e, "Close failed on shutdown");
            }
        }
        self.export_stats();
        let stats = self.stats();

        let Self {
            outputs,
            metrics_worker,
            ..
        } = self;
        // recorders hold the emitters the worker waits on
        drop(outputs);
        if let Some(worker) = metrics_worker {
            worker.shutdown().await;
        }

        info!("Dispatcher shutdown complete");
        stats
    }
}

/// One delivery: run `send` in its own task, record its outcome and report it
async fn deliver<O>(
    output: Arc<O>,
    recorder: OutputRecorder,
    event: Arc<SecurityEvent>,
    body: Bytes,
    outcome_tx: mpsc::UnboundedSender<DeliveryOutcome>,
) where
    O: Output + Sync + 'static,
{
    let started = Instant::now();
    let attempt = tokio::spawn(async move { output.send(&event, &body).await });

    let outcome = match attempt.await {
        Ok(result) => recorder.record(&result),
        Err(e) if e.is_panic() => recorder.report_error(&OutputError::Aborted("panic")),
        Err(_) => recorder.report_error(&OutputError::Aborted("cancelled")),
    };
    observability::record_delivery_latency_ms(
        recorder.destination(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
    // the caller may have stopped waiting; the outcome is already recorded
    let _ = outcome_tx.send(outcome);
}

/// Convenience function to create a dispatcher from configuration
#[instrument(name = "dispatcher_create", skip(config))]
pub async fn create_dispatcher(config: RelayConfig) -> Result<Dispatcher, DispatcherError> {
    DispatcherBuilder::new(config).build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::tests::MemoryBackend;
    use contracts::{DeliveryStatus, Priority};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Slow(u64),
    }

    /// Output with scripted behavior
    struct FakeOutput {
        destination: Destination,
        minimum_priority: Priority,
        behavior: Behavior,
        sends: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl FakeOutput {
        fn new(destination: Destination, behavior: Behavior) -> Self {
            Self {
                destination,
                minimum_priority: Priority::Debug,
                behavior,
                sends: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Output for FakeOutput {
        fn destination(&self) -> Destination {
            self.destination
        }

        fn minimum_priority(&self) -> Priority {
            self.minimum_priority
        }

        async fn send(&self, _event: &SecurityEvent, _body: &Bytes) -> Result<(), OutputError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(OutputError::connection("connection refused")),
                Behavior::Panic => panic!("output bug"),
                Behavior::Slow(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(())
                }
            }
        }

        async fn close(&self) -> Result<(), OutputError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher(outputs: Vec<FakeOutput>) -> (Dispatcher<FakeOutput>, Arc<MemoryBackend>, MetricsWorker) {
        let backend = Arc::new(MemoryBackend::default());
        let (emitter, worker) = MetricsWorker::spawn(1024, backend.clone());
        let dispatcher = Dispatcher::with_outputs(outputs, Arc::new(Stats::new()), emitter);
        (dispatcher, backend, worker)
    }

    fn event(priority: Priority) -> SecurityEvent {
        SecurityEvent::new("Write below etc", priority, "File below /etc opened for writing")
    }

    fn snapshot(total: u64, ok: u64, error: u64) -> StatsSnapshot {
        StatsSnapshot { total, ok, error }
    }

    #[tokio::test]
    async fn test_fanout_counts_each_output_once() {
        let (dispatcher, backend, worker) = dispatcher(vec![
            FakeOutput::new(Destination::Elasticsearch, Behavior::Succeed),
            FakeOutput::new(Destination::Mqtt, Behavior::Succeed),
        ]);

        let summary = dispatcher.dispatch(event(Priority::Warning)).await;

        assert_eq!(summary, DispatchSummary { attempted: 2, ok: 2, error: 0, skipped: 0 });
        let stats = dispatcher.shutdown().await;
        assert_eq!(stats, vec![
            (Destination::Elasticsearch, snapshot(1, 1, 0)),
            (Destination::Mqtt, snapshot(1, 1, 0)),
        ]);

        worker.shutdown().await;
        assert_eq!(backend.count(Destination::Elasticsearch, DeliveryStatus::Ok), 1);
        assert_eq!(backend.count(Destination::Mqtt, DeliveryStatus::Ok), 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_output() {
        let (dispatcher, backend, worker) = dispatcher(vec![
            FakeOutput::new(Destination::Elasticsearch, Behavior::Succeed),
            FakeOutput::new(Destination::Mqtt, Behavior::Fail),
        ]);

        let summary = dispatcher.dispatch(event(Priority::Critical)).await;

        assert_eq!(summary.ok, 1);
        assert_eq!(summary.error, 1);
        let stats = dispatcher.stats_handle();
        assert_eq!(stats.snapshot(Destination::Elasticsearch), snapshot(1, 1, 0));
        assert_eq!(stats.snapshot(Destination::Mqtt), snapshot(1, 0, 1));

        dispatcher.shutdown().await;
        worker.shutdown().await;
        let events = backend.events.lock().unwrap();
        let failure = events
            .iter()
            .find(|e| e.tags.destination == Destination::Mqtt)
            .unwrap();
        assert_eq!(failure.tags.status, DeliveryStatus::Error);
        assert_eq!(failure.detail.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_error() {
        let (dispatcher, backend, worker) = dispatcher(vec![
            FakeOutput::new(Destination::Webhook, Behavior::Panic),
            FakeOutput::new(Destination::Elasticsearch, Behavior::Succeed),
        ]);

        let summary = dispatcher.dispatch(event(Priority::Error)).await;

        assert_eq!(summary, DispatchSummary { attempted: 2, ok: 1, error: 1, skipped: 0 });
        assert_eq!(dispatcher.stats_handle().snapshot(Destination::Webhook), snapshot(1, 0, 1));

        dispatcher.shutdown().await;
        worker.shutdown().await;
        let events = backend.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| e.tags.destination == Destination::Webhook && e.detail.as_deref() == Some("panic")));
    }

    #[tokio::test]
    async fn test_slow_output_does_not_delay_other_recording() {
        let (dispatcher, _backend, _worker) = dispatcher(vec![
            FakeOutput::new(Destination::Mqtt, Behavior::Slow(500)),
            FakeOutput::new(Destination::Elasticsearch, Behavior::Succeed),
        ]);
        let dispatcher = Arc::new(dispatcher);
        let stats = dispatcher.stats_handle();

        let running = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(event(Priority::Alert)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(stats.snapshot(Destination::Elasticsearch), snapshot(1, 1, 0));
        assert_eq!(stats.snapshot(Destination::Mqtt).in_flight(), 1);

        let summary = running.await.unwrap();
        assert_eq!(summary.ok, 2);
        assert_eq!(stats.snapshot(Destination::Mqtt), snapshot(1, 1, 0));
    }

    #[tokio::test]
    async fn test_dropped_dispatch_still_records_outcome() {
        let slow = FakeOutput::new(Destination::Mqtt, Behavior::Slow(200));
        let slow_sends = Arc::clone(&slow.sends);
        let (dispatcher, backend, worker) = dispatcher(vec![slow]);
        let stats = dispatcher.stats_handle();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), dispatcher.dispatch(event(Priority::Critical))).await;
        assert!(timed_out.is_err());
        assert_eq!(stats.snapshot(Destination::Mqtt).in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(slow_sends.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot(Destination::Mqtt), snapshot(1, 1, 0));

        dispatcher.shutdown().await;
        worker.shutdown().await;
        assert_eq!(backend.count(Destination::Mqtt, DeliveryStatus::Ok), 1);
    }

    #[tokio::test]
    async fn test_minimum_priority_skips_without_counting() {
        let mut picky = FakeOutput::new(Destination::Elasticsearch, Behavior::Succeed);
        picky.minimum_priority = Priority::Critical;
        let picky_sends = Arc::clone(&picky.sends);
        let (dispatcher, _backend, _worker) = dispatcher(vec![
            picky,
            FakeOutput::new(Destination::Webhook, Behavior::Succeed),
        ]);

        let summary = dispatcher.dispatch(event(Priority::Warning)).await;
        assert_eq!(summary, DispatchSummary { attempted: 1, ok: 1, error: 0, skipped: 1 });
        assert_eq!(picky_sends.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.stats_handle().snapshot(Destination::Elasticsearch).total, 0);

        let summary = dispatcher.dispatch(event(Priority::Emergency)).await;
        assert_eq!(summary.attempted, 2);
        assert_eq!(picky_sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_outputs_is_a_no_op() {
        let (dispatcher, _backend, _worker) = dispatcher(Vec::new());
        let summary = dispatcher.dispatch(event(Priority::Emergency)).await;
        assert_eq!(summary, DispatchSummary::default());
        assert!(dispatcher.destinations().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_keeps_counters_consistent() {
        let (dispatcher, _backend, _worker) = dispatcher(vec![
            FakeOutput::new(Destination::Elasticsearch, Behavior::Succeed),
            FakeOutput::new(Destination::Mqtt, Behavior::Fail),
            FakeOutput::new(Destination::Webhook, Behavior::Slow(1)),
        ]);
        let dispatcher = Arc::new(dispatcher);

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { dispatcher.dispatch(event(Priority::Notice)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stats = dispatcher.stats_handle();
        assert_eq!(stats.snapshot(Destination::Elasticsearch), snapshot(200, 200, 0));
        assert_eq!(stats.snapshot(Destination::Mqtt), snapshot(200, 0, 200));
        assert_eq!(stats.snapshot(Destination::Webhook), snapshot(200, 200, 0));
    }

    #[tokio::test]
    async fn test_run_drains_channel_and_closes_outputs() {
        let output = FakeOutput::new(Destination::Mqtt, Behavior::Succeed);
        let closed = Arc::clone(&output.closed);
        let sends = Arc::clone(&output.sends);
        let (dispatcher, _backend, _worker) = dispatcher(vec![output]);

        let (input_tx, input_rx) = mpsc::channel(16);
        let handle = dispatcher.spawn(input_rx);
        for _ in 0..5 {
            input_tx.send(event(Priority::Informational)).await.unwrap();
        }
        drop(input_tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats, vec![(Destination::Mqtt, snapshot(5, 5, 0))]);
        assert_eq!(sends.load(Ordering::SeqCst), 5);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_builder_owns_metrics_worker() {
        let backend = Arc::new(MemoryBackend::default());
        let stats = Arc::new(Stats::new());
        let dispatcher = DispatcherBuilder::new(RelayConfig::default())
            .with_stats(Arc::clone(&stats))
            .with_metrics_backend(backend)
            .build()
            .await
            .unwrap();

        assert!(dispatcher.destinations().is_empty());
        assert!(Arc::ptr_eq(&dispatcher.stats_handle(), &stats));
        assert!(dispatcher.shutdown().await.is_empty());
    }
}
