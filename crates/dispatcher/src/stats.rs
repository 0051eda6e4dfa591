//! Per-destination delivery counters

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::Destination;

/// Counters for a single destination
#[derive(Debug, Default)]
pub struct OutputStats {
    /// Attempts made
    total: AtomicU64,
    /// Attempts that succeeded
    ok: AtomicU64,
    /// Attempts that failed
    error: AtomicU64,
}

impl OutputStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn inc_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ok(&self) -> u64 {
        self.ok.load(Ordering::Relaxed)
    }

    pub fn inc_ok(&self) {
        self.ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) -> u64 {
        self.error.load(Ordering::Relaxed)
    }

    pub fn inc_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all counters
    ///
    /// Counters are read one at a time, so a snapshot taken while deliveries
    /// are in flight may show `total > ok + error`.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total(),
            ok: self.ok(),
            error: self.error(),
        }
    }
}

/// Snapshot of one destination's counters (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub ok: u64,
    pub error: u64,
}

impl StatsSnapshot {
    /// Attempts whose outcome has not been recorded yet
    pub fn in_flight(&self) -> u64 {
        self.total.saturating_sub(self.ok + self.error)
    }
}

/// Counters for every destination type
///
/// Built explicitly and shared by `Arc`; every destination has a slot whether
/// or not it is enabled.
#[derive(Debug, Default)]
pub struct Stats {
    outputs: [OutputStats; Destination::ALL.len()],
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of one destination
    pub fn output(&self, destination: Destination) -> &OutputStats {
        &self.outputs[slot(destination)]
    }

    pub fn increment_total(&self, destination: Destination) {
        self.output(destination).inc_total();
    }

    pub fn increment_ok(&self, destination: Destination) {
        self.output(destination).inc_ok();
    }

    pub fn increment_error(&self, destination: Destination) {
        self.output(destination).inc_error();
    }

    pub fn snapshot(&self, destination: Destination) -> StatsSnapshot {
        self.output(destination).snapshot()
    }

    /// Snapshot of every destination, in `Destination::ALL` order
    pub fn snapshot_all(&self) -> Vec<(Destination, StatsSnapshot)> {
        Destination::ALL
            .iter()
            .map(|&d| (d, self.snapshot(d)))
            .collect()
    }
}

fn slot(destination: Destination) -> usize {
    match destination {
        Destination::Elasticsearch => 0,
        Destination::Mqtt => 1,
        Destination::Webhook => 2,
    }
}
