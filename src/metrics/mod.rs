//! Prometheus metrics for pifleet discovery and reconciliation
//!
//! This module provides metrics tracking for:
//! - Discovery: cycles, sample duration and failures, membership size, emitted events
//! - Observers: handler failures and events dropped on full queues
//! - Reconciler: outcomes per membership event
//! - Beacon: announcement attempts
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for discovery service metrics
struct DiscoveryMetrics {
    members: Gauge,
    cycles: CounterVec,
    sample_errors: CounterVec,
    sample_duration: HistogramVec,
    events: CounterVec,
    observer_failures: CounterVec,
    observer_dropped: CounterVec,
}

/// Container for reconciler and beacon metrics
struct FleetMetrics {
    reconcile_outcomes: CounterVec,
    announcements: CounterVec,
}

static DISCOVERY_METRICS: OnceLock<DiscoveryMetrics> = OnceLock::new();

static FLEET_METRICS: OnceLock<FleetMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Registration failures are returned once; afterwards every recording
/// function is a no-op.
///
/// ```ignore
/// if let Err(e) = pifleet::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics disabled");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let discovery = DiscoveryMetrics {
        members: register_gauge!(
            "pifleet_discovery_members",
            "Number of nodes currently in the membership registry"
        )?,
        cycles: register_counter_vec!(
            "pifleet_discovery_cycles_total",
            "Discovery and sweep cycles run",
            &["cycle"]
        )?,
        sample_errors: register_counter_vec!(
            "pifleet_discovery_sample_errors_total",
            "Backend sample failures by kind",
            &["backend", "kind"]
        )?,
        sample_duration: register_histogram_vec!(
            "pifleet_discovery_sample_duration_seconds",
            "Backend sample duration in seconds",
            &["backend"],
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        events: register_counter_vec!(
            "pifleet_discovery_events_total",
            "Membership events emitted by kind",
            &["kind"]
        )?,
        observer_failures: register_counter_vec!(
            "pifleet_discovery_observer_failures_total",
            "Observer handler errors and panics",
            &["observer"]
        )?,
        observer_dropped: register_counter_vec!(
            "pifleet_discovery_observer_dropped_total",
            "Events dropped because an observer queue was full or closed",
            &["observer"]
        )?,
    };

    let fleet = FleetMetrics {
        reconcile_outcomes: register_counter_vec!(
            "pifleet_reconcile_outcomes_total",
            "Reconciler results by outcome",
            &["outcome"]
        )?,
        announcements: register_counter_vec!(
            "pifleet_announcements_total",
            "Beacon announcements by result",
            &["result"]
        )?,
    };

    DISCOVERY_METRICS.set(discovery).map_err(|_| "Discovery metrics already initialized")?;
    FLEET_METRICS.set(fleet).map_err(|_| "Fleet metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    DISCOVERY_METRICS.get().is_some() && FLEET_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Update the membership size gauge
pub fn set_members(count: usize) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.members.set(count as f64);
    }
}

/// Record a completed cycle (`discovery` or `sweep`)
pub fn record_cycle(cycle: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.cycles.with_label_values(&[cycle]).inc();
    }
}

/// Record a failed backend sample
pub fn record_sample_error(backend: &str, kind: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.sample_errors.with_label_values(&[backend, kind]).inc();
    }
}

/// Record an emitted membership event
pub fn record_event(kind: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.events.with_label_values(&[kind]).inc();
    }
}

/// Record an observer error or panic
pub fn record_observer_failure(observer: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.observer_failures.with_label_values(&[observer]).inc();
    }
}

/// Record an event dropped for one observer
pub fn record_observer_dropped(observer: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.observer_dropped.with_label_values(&[observer]).inc();
    }
}

/// Record a reconciler outcome (`created`, `refreshed`, `error`, ...)
pub fn record_reconcile_outcome(outcome: &str) {
    if let Some(m) = FLEET_METRICS.get() {
        m.reconcile_outcomes.with_label_values(&[outcome]).inc();
    }
}

/// Record a beacon announcement attempt
pub fn record_announcement(success: bool) {
    if let Some(m) = FLEET_METRICS.get() {
        let result = if success { "ok" } else { "error" };
        m.announcements.with_label_values(&[result]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a sample timer for a backend
pub fn start_sample_timer(backend: &str) -> MetricsTimer {
    match DISCOVERY_METRICS.get() {
        Some(m) => MetricsTimer::new(m.sample_duration.with_label_values(&[backend]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
