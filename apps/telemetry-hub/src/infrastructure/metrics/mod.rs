//! Prometheus Metrics Module
//!
//! Exposes hub metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: frames received and dropped, connection state, reconnects
//! - **Broker**: snapshots applied and discarded, tracked accounts, subscribers
//! - **Stats**: requests by outcome and request latency
//!
//! # Integration
//!
//! Metrics are served at `/metrics` by the exporter's own HTTP listener.
//! Recording without an installed recorder is a no-op.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::domain::stats::StatsError;
use crate::infrastructure::stream::ConnectionState;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Metrics initialization error.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Recorder was already installed in this process.
    #[error("metrics recorder already installed")]
    AlreadyInstalled,
    /// The exporter could not be started.
    #[error("failed to install Prometheus exporter: {0}")]
    Installation(String),
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
pub fn init_metrics(port: u16) -> Result<SocketAddr, MetricsError> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Err(MetricsError::AlreadyInstalled);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        INSTALLED.store(false, Ordering::SeqCst);
        return Err(MetricsError::Installation(e.to_string()));
    }

    register_metrics();
    Ok(addr)
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream
    describe_counter!(
        "telemetry_frames_received_total",
        "Total frames read from the telemetry stream"
    );
    describe_counter!(
        "telemetry_frames_dropped_total",
        "Total malformed frames dropped by reason"
    );
    describe_counter!(
        "telemetry_reconnects_total",
        "Total explicit reconnects after a fault or close"
    );
    describe_gauge!(
        "telemetry_connection_state",
        "Stream connection state (0=disconnected .. 5=faulted)"
    );

    // Broker
    describe_counter!(
        "telemetry_snapshots_applied_total",
        "Total account snapshots that replaced the stored one"
    );
    describe_counter!(
        "telemetry_snapshots_stale_total",
        "Total account snapshots discarded as stale or duplicate"
    );
    describe_gauge!("telemetry_accounts", "Number of tracked accounts");
    describe_gauge!("telemetry_subscribers", "Number of live subscriptions");

    // Stats
    describe_counter!(
        "telemetry_stats_requests_total",
        "Total stats requests by outcome"
    );
    describe_histogram!(
        "telemetry_stats_request_seconds",
        "Stats request latency including retries"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a stats request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsOutcome {
    /// Decoded successfully.
    Success,
    /// Transport failure or bad HTTP status.
    Transport,
    /// Server reported `success = false`.
    ServerReported,
    /// Response could not be decoded.
    Decode,
}

impl StatsOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Transport => "transport",
            Self::ServerReported => "server_reported",
            Self::Decode => "decode",
        }
    }
}

impl From<&StatsError> for StatsOutcome {
    fn from(error: &StatsError) -> Self {
        use crate::domain::stats::FaultCategory;

        match error.category() {
            FaultCategory::Transport => Self::Transport,
            FaultCategory::ServerReported => Self::ServerReported,
            FaultCategory::Decode => Self::Decode,
        }
    }
}

/// Record frames read from the stream.
pub fn record_frames_received(count: u64) {
    counter!("telemetry_frames_received_total").increment(count);
}

/// Record a dropped frame.
pub fn record_frame_dropped(reason: &'static str) {
    counter!("telemetry_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record an explicit reconnect.
pub fn record_reconnect() {
    counter!("telemetry_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("telemetry_connection_state").set(f64::from(state.gauge_value()));
}

/// Record the result of applying one update.
pub fn record_apply(applied: usize, stale: usize) {
    counter!("telemetry_snapshots_applied_total").increment(applied as u64);
    counter!("telemetry_snapshots_stale_total").increment(stale as u64);
}

/// Update the tracked account and subscriber gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_broker_sizes(accounts: usize, subscribers: usize) {
    gauge!("telemetry_accounts").set(accounts as f64);
    gauge!("telemetry_subscribers").set(subscribers as f64);
}

/// Record a finished stats request.
pub fn record_stats_request(outcome: StatsOutcome, duration: Duration) {
    counter!("telemetry_stats_requests_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("telemetry_stats_request_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
