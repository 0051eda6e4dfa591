//! Output metric recording
//!
//! Thin helpers over the `metrics` facade. Whatever recorder is installed
//! (Prometheus in the binary, none in most tests) receives them.

use contracts::{DeliveryStatus, Destination};
use metrics::{counter, gauge, histogram};

/// Record one delivery outcome
pub fn record_output_event(destination: Destination, status: DeliveryStatus, delta: u64) {
    counter!(
        "alert_relay_outputs_total",
        "destination" => destination.as_str(),
        "status" => status.as_str()
    )
    .increment(delta);
}

/// Record the duration of one delivery attempt
pub fn record_delivery_latency_ms(destination: Destination, latency_ms: f64) {
    histogram!(
        "alert_relay_delivery_latency_ms",
        "destination" => destination.as_str()
    )
    .record(latency_ms);
}

/// Record metric events dropped because the emission queue was full
pub fn record_metric_events_dropped(count: u64) {
    counter!("alert_relay_metric_events_dropped_total").increment(count);
}

/// Export process-wide per-destination counters for scraping
pub fn record_output_stats(destination: Destination, total: u64, ok: u64, error: u64) {
    let name = destination.as_str();
    gauge!("alert_relay_output_events", "destination" => name, "status" => "total")
        .set(total as f64);
    gauge!("alert_relay_output_events", "destination" => name, "status" => "ok").set(ok as f64);
    gauge!("alert_relay_output_events", "destination" => name, "status" => "error")
        .set(error as f64);
}

/// Record one dispatched event
pub fn record_event_dispatched(outputs: usize) {
    counter!("alert_relay_events_total").increment(1);
    gauge!("alert_relay_outputs_invoked").set(outputs as f64);
}
