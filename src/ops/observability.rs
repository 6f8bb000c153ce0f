//! Metrics.
//!
//! Metric namespaces:
//! - steward.pipeline.*
//! - steward.dispatch.*
//! - steward.cache.*
//! - steward.compatibility.*
//! - steward.controller.*

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metric names.
pub mod metrics {
    /// Pipeline runs started.
    pub const RUNS_STARTED: &str = "steward.pipeline.runs_started";
    /// Pipeline runs that completed every stage.
    pub const RUNS_COMPLETED: &str = "steward.pipeline.runs_completed";
    /// Pipeline runs aborted, suffixed with the failing stage.
    pub const RUNS_ABORTED: &str = "steward.pipeline.runs_aborted";
    /// Run duration in milliseconds.
    pub const RUN_DURATION_MS: &str = "steward.pipeline.run_duration_ms";
    /// Instructions written to participant queues.
    pub const INSTRUCTIONS_DISPATCHED: &str = "steward.dispatch.instructions_total";
    /// Instruction writes that failed.
    pub const DISPATCH_FAILURES: &str = "steward.dispatch.failures_total";
    /// Stale-session instructions purged.
    pub const STALE_INSTRUCTIONS_PURGED: &str = "steward.dispatch.stale_purged_total";
    /// Acknowledgments processed.
    pub const ACKNOWLEDGMENTS: &str = "steward.dispatch.acknowledgments_total";
    /// Observed entries filtered for a stale session.
    pub const STALE_OBSERVED_FILTERED: &str = "steward.cache.stale_observed_total";
    /// Stuck transitions recorded.
    pub const STUCK_TRANSITIONS: &str = "steward.pipeline.stuck_transitions_total";
    /// Participants rejected by the compatibility gate.
    pub const INCOMPATIBLE_PARTICIPANTS: &str = "steward.compatibility.incompatible_total";
    /// Triggers folded into an already pending run.
    pub const TRIGGERS_COALESCED: &str = "steward.controller.triggers_coalesced_total";
    /// Number of clusters with a running controller.
    pub const ACTIVE_CONTROLLERS: &str = "steward.controller.active";
}

/// In-process metrics registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, AtomicU64>>,
    histograms: RwLock<HashMap<String, HistogramData>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Get counter value.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Set a gauge value.
    pub fn gauge_set(&self, name: &str, value: u64) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Get gauge value.
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Increment a gauge.
    pub fn gauge_inc(&self, name: &str) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement a gauge, saturating at zero.
    pub fn gauge_dec(&self, name: &str) {
        if let Some(gauge) = self.gauges.read().get(name) {
            let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
        }
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, value: f64) {
        if let Some(data) = self.histograms.read().get(name) {
            data.observe(value);
            return;
        }
        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(HistogramData::new)
            .observe(value);
    }

    /// Get histogram data.
    pub fn histogram_get(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.read().get(name).map(|h| h.snapshot())
    }

    /// Export metrics in Prometheus text format, sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        let counters = self.counters.read();
        let mut names: Vec<&String> = counters.keys().collect();
        names.sort();
        for name in names {
            let prometheus_name = name.replace('.', "_");
            output.push_str(&format!(
                "# TYPE {} counter\n{} {}\n",
                prometheus_name,
                prometheus_name,
                counters[name].load(Ordering::Relaxed)
            ));
        }

        let gauges = self.gauges.read();
        let mut names: Vec<&String> = gauges.keys().collect();
        names.sort();
        for name in names {
            let prometheus_name = name.replace('.', "_");
            output.push_str(&format!(
                "# TYPE {} gauge\n{} {}\n",
                prometheus_name,
                prometheus_name,
                gauges[name].load(Ordering::Relaxed)
            ));
        }

        let histograms = self.histograms.read();
        let mut names: Vec<&String> = histograms.keys().collect();
        names.sort();
        for name in names {
            let prometheus_name = name.replace('.', "_");
            let snapshot = histograms[name].snapshot();
            output.push_str(&format!(
                "# TYPE {} histogram\n{}_count {}\n{}_sum {}\n",
                prometheus_name, prometheus_name, snapshot.count, prometheus_name, snapshot.sum
            ));
        }

        output
    }
}

#[derive(Debug)]
struct HistogramData {
    count: AtomicU64,
    // sum, min, max
    stats: Mutex<(f64, f64, f64)>,
}

impl HistogramData {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            stats: Mutex::new((0.0, f64::MAX, f64::MIN)),
        }
    }

    fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let mut stats = self.stats.lock();
        stats.0 += value;
        stats.1 = stats.1.min(value);
        stats.2 = stats.2.max(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let (sum, min, max) = *self.stats.lock();
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum,
            min,
            max,
        }
    }
}

/// Histogram snapshot.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Minimum value observed.
    pub min: f64,
    /// Maximum value observed.
    pub max: f64,
}

impl HistogramSnapshot {
    /// Calculate mean.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Controller metrics collector.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    registry: MetricsRegistry,
}

impl ControllerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the underlying registry.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    // === Pipeline ===

    /// Record a run start.
    pub fn record_run_started(&self) {
        self.registry.counter_inc(metrics::RUNS_STARTED);
    }

    /// Record a completed run and its duration.
    pub fn record_run_completed(&self, duration_ms: f64) {
        self.registry.counter_inc(metrics::RUNS_COMPLETED);
        self.registry
            .histogram_observe(metrics::RUN_DURATION_MS, duration_ms);
    }

    /// Record a run aborted in `stage`.
    pub fn record_run_aborted(&self, stage: &str, duration_ms: f64) {
        self.registry.counter_inc(metrics::RUNS_ABORTED);
        self.registry
            .counter_inc(&format!("{}.{}", metrics::RUNS_ABORTED, stage));
        self.registry
            .histogram_observe(metrics::RUN_DURATION_MS, duration_ms);
    }

    /// Record stuck transitions found by one run.
    pub fn record_stuck_transitions(&self, count: usize) {
        self.registry
            .counter_add(metrics::STUCK_TRANSITIONS, count as u64);
    }

    // === Snapshot ===

    /// Record observed entries dropped for a stale session.
    pub fn record_stale_observed(&self, count: usize) {
        self.registry
            .counter_add(metrics::STALE_OBSERVED_FILTERED, count as u64);
    }

    /// Record participants that failed the version check.
    pub fn record_incompatible(&self, count: usize) {
        self.registry
            .counter_add(metrics::INCOMPATIBLE_PARTICIPANTS, count as u64);
    }

    // === Dispatch ===

    /// Record instruction writes.
    pub fn record_dispatched(&self, written: usize, failed: usize) {
        self.registry
            .counter_add(metrics::INSTRUCTIONS_DISPATCHED, written as u64);
        self.registry
            .counter_add(metrics::DISPATCH_FAILURES, failed as u64);
    }

    /// Record purged stale instructions.
    pub fn record_stale_purged(&self, count: usize) {
        self.registry
            .counter_add(metrics::STALE_INSTRUCTIONS_PURGED, count as u64);
    }

    /// Record an acknowledgment.
    pub fn record_acknowledgment(&self) {
        self.registry.counter_inc(metrics::ACKNOWLEDGMENTS);
    }

    // === Controller ===

    /// Record a trigger folded into a pending run.
    pub fn record_coalesced(&self) {
        self.registry.counter_inc(metrics::TRIGGERS_COALESCED);
    }

    /// Record a controller start.
    pub fn controller_started(&self) {
        self.registry.gauge_inc(metrics::ACTIVE_CONTROLLERS);
    }

    /// Record a controller stop.
    pub fn controller_stopped(&self) {
        self.registry.gauge_dec(metrics::ACTIVE_CONTROLLERS);
    }

    /// Export all metrics.
    pub fn export(&self) -> String {
        self.registry.export_prometheus()
    }
}
