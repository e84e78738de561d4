//! Observability metrics for saga coordination.
//!
//! This module provides Prometheus-compatible metrics for monitoring the
//! coordinator. Metrics are designed to support:
//!
//! - **Alerting**: SLO-based alerts on scan latency and compensation failures
//! - **Dashboards**: Real-time visibility into saga throughput and backlog
//! - **Debugging**: Correlating metrics with traces for root cause analysis
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `riata_saga_events_admitted_total` | Counter | `event_type` | Events accepted into the log |
//! | `riata_saga_events_rejected_total` | Counter | `event_type`, `reason` | Events turned away at admission |
//! | `riata_saga_scan_cycles_total` | Counter | - | Completed reconciliation cycles |
//! | `riata_saga_scan_cycle_duration_seconds` | Histogram | - | Full-cycle processing time |
//! | `riata_saga_compensations_dispatched_total` | Counter | `result` | Compensation send outcomes |
//! | `riata_saga_compensation_retries_total` | Counter | - | Commands pushed back for retry |
//! | `riata_saga_retry_queue_depth` | Gauge | - | Commands waiting in the retry queue |
//! | `riata_saga_timeouts_detected_total` | Counter | - | Expired start events turned into watches |
//!
//! ## Integration
//!
//! Metrics are exposed via the `metrics` crate facade. To export to Prometheus:
//!
//! ```rust,ignore
//! use metrics_exporter_prometheus::PrometheusBuilder;
//!
//! PrometheusBuilder::new()
//!     .with_http_listener(([0, 0, 0, 0], 9090))
//!     .install()
//!     .expect("failed to install Prometheus recorder");
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

use crate::event::EventType;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Events accepted into the log.
    pub const EVENTS_ADMITTED_TOTAL: &str = "riata_saga_events_admitted_total";
    /// Counter: Events turned away at admission.
    pub const EVENTS_REJECTED_TOTAL: &str = "riata_saga_events_rejected_total";
    /// Counter: Completed reconciliation cycles.
    pub const SCAN_CYCLES_TOTAL: &str = "riata_saga_scan_cycles_total";
    /// Histogram: Full reconciliation cycle duration in seconds.
    pub const SCAN_CYCLE_DURATION_SECONDS: &str = "riata_saga_scan_cycle_duration_seconds";
    /// Counter: Compensation send outcomes.
    pub const COMPENSATIONS_DISPATCHED_TOTAL: &str = "riata_saga_compensations_dispatched_total";
    /// Counter: Commands pushed back for asynchronous retry.
    pub const COMPENSATION_RETRIES_TOTAL: &str = "riata_saga_compensation_retries_total";
    /// Gauge: Commands waiting in the retry queue.
    pub const RETRY_QUEUE_DEPTH: &str = "riata_saga_retry_queue_depth";
    /// Counter: Expired start events turned into timeout watches.
    pub const TIMEOUTS_DETECTED_TOTAL: &str = "riata_saga_timeouts_detected_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Transaction event type.
    pub const EVENT_TYPE: &str = "event_type";
    /// Admission rejection reason (aborted_global, stale_saga_ended).
    pub const REASON: &str = "reason";
    /// Dispatch outcome (sent, failed, no_callback).
    pub const RESULT: &str = "result";
}

/// High-level interface for recording coordinator metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct SagaMetrics {
    _private: (),
}

impl SagaMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an admitted event.
    pub fn record_admitted(&self, event_type: EventType) {
        counter!(
            names::EVENTS_ADMITTED_TOTAL,
            labels::EVENT_TYPE => event_type.as_str(),
        )
        .increment(1);
    }

    /// Records an event turned away at admission.
    pub fn record_rejected(&self, event_type: EventType, reason: &'static str) {
        counter!(
            names::EVENTS_REJECTED_TOTAL,
            labels::EVENT_TYPE => event_type.as_str(),
            labels::REASON => reason,
        )
        .increment(1);
    }

    /// Records a completed reconciliation cycle and its duration.
    pub fn record_scan_cycle(&self, duration: Duration) {
        counter!(names::SCAN_CYCLES_TOTAL).increment(1);
        histogram!(names::SCAN_CYCLE_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records a compensation dispatch outcome.
    pub fn record_dispatch(&self, result: &'static str) {
        counter!(
            names::COMPENSATIONS_DISPATCHED_TOTAL,
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Records a command pushed back for asynchronous retry.
    pub fn record_compensation_retry(&self) {
        counter!(names::COMPENSATION_RETRIES_TOTAL).increment(1);
    }

    /// Updates the retry queue depth gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_retry_queue_depth(&self, depth: usize) {
        gauge!(names::RETRY_QUEUE_DEPTH).set(depth as f64);
    }

    /// Records an expired start event turned into a timeout watch.
    pub fn record_timeout_detected(&self) {
        counter!(names::TIMEOUTS_DETECTED_TOTAL).increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed
    /// duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard that records a full scan cycle on drop.
#[must_use]
pub fn time_scan_cycle() -> TimingGuard<impl FnOnce(Duration)> {
    let metrics = SagaMetrics::new();
    TimingGuard::new(move |duration| {
        metrics.record_scan_cycle(duration);
    })
}
