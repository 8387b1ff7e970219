//! Prometheus metrics for the campaign dialer
//!
//! This module tracks:
//! - Dialer: dials placed, call outcomes, talk time, active campaigns
//! - Policy: throttle skips by reason
//! - Carousel: caller-ID selections by source
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

use crate::carousel::CallerIdSource;
use crate::models::{CallOutcome, SkipReason};

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all dialer metrics
struct DialerMetrics {
    dials: CounterVec,
    outcomes: CounterVec,
    call_duration: HistogramVec,
    targets_skipped: CounterVec,
    caller_id_selections: CounterVec,
    active_campaigns: Gauge,
}

/// Global storage for dialer metrics
static DIALER_METRICS: OnceLock<DialerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = powerdial::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = DialerMetrics {
        dials: register_counter_vec!(
            "powerdial_dials_total",
            "Total calls placed by agent",
            &["agent"]
        )?,
        outcomes: register_counter_vec!(
            "powerdial_call_outcomes_total",
            "Total finished calls by outcome",
            &["outcome"]
        )?,
        call_duration: register_histogram_vec!(
            "powerdial_call_duration_seconds",
            "Time from dial to hang-up in seconds",
            &["outcome"],
            vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0]
        )?,
        targets_skipped: register_counter_vec!(
            "powerdial_targets_skipped_total",
            "Targets resolved without a call, by reason",
            &["reason"]
        )?,
        caller_id_selections: register_counter_vec!(
            "powerdial_caller_id_selections_total",
            "Caller IDs handed out, by source",
            &["source"]
        )?,
        active_campaigns: register_gauge!(
            "powerdial_active_campaigns",
            "Number of campaigns currently running"
        )?,
    };

    DIALER_METRICS.set(metrics).ok();
    Ok(())
}

/// Check if metrics are initialized
pub fn metrics_initialized() -> bool {
    DIALER_METRICS.get().is_some()
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

/// Record a placed call
pub fn record_dial(agent_id: &str) {
    if let Some(m) = DIALER_METRICS.get() {
        m.dials.with_label_values(&[agent_id]).inc();
    }
}

/// Record a finished call
pub fn record_call_outcome(outcome: CallOutcome, duration_secs: f64) {
    let Some(m) = DIALER_METRICS.get() else {
        return;
    };

    m.outcomes.with_label_values(&[outcome.as_str()]).inc();
    m.call_duration
        .with_label_values(&[outcome.as_str()])
        .observe(duration_secs);
}

/// Record a policy skip
pub fn record_target_skipped(reason: SkipReason) {
    if let Some(m) = DIALER_METRICS.get() {
        let label = match reason {
            SkipReason::RecentlyContacted => "recently_contacted",
            SkipReason::ThrottleUnavailable => "throttle_unavailable",
        };
        m.targets_skipped.with_label_values(&[label]).inc();
    }
}

/// Record a caller-ID selection
pub fn record_caller_id(source: CallerIdSource) {
    if let Some(m) = DIALER_METRICS.get() {
        m.caller_id_selections
            .with_label_values(&[&source.to_string()])
            .inc();
    }
}

pub fn campaign_started() {
    if let Some(m) = DIALER_METRICS.get() {
        m.active_campaigns.inc();
    }
}

pub fn campaign_finished() {
    if let Some(m) = DIALER_METRICS.get() {
        m.active_campaigns.dec();
    }
}
