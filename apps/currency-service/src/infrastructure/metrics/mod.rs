//! Prometheus Metrics Module
//!
//! Exposes service metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Refresh**: upstream fetch outcomes, latency and table size
//! - **Lookups**: unary `GetRate` outcomes
//! - **Streaming**: pushes, open streams, subscriptions and rejections
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed (for example
/// because another recorder is already registered).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Refresh
    describe_counter!(
        "currency_refresh_total",
        "Upstream rate fetches by outcome"
    );
    describe_histogram!(
        "currency_refresh_seconds",
        "Time spent fetching and parsing the upstream document"
    );
    describe_gauge!(
        "currency_rates_tracked",
        "Number of currencies in the rate table"
    );

    // Lookups
    describe_counter!(
        "currency_rate_lookups_total",
        "Unary rate lookups by outcome"
    );

    // Streaming
    describe_counter!(
        "currency_pushes_total",
        "Rate pushes to streaming clients by outcome"
    );
    describe_gauge!(
        "currency_stream_connections",
        "Open SubscribeRates streams"
    );
    describe_gauge!(
        "currency_subscriptions",
        "Registered (base, destination) subscriptions"
    );
    describe_counter!(
        "currency_subscription_rejections_total",
        "Subscription requests refused by reason"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Result of one upstream fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Table replaced.
    Success,
    /// Fetch or parse failed; table retained.
    Failure,
}

impl RefreshOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Result of one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued for the client.
    Sent,
    /// Dropped because the client's queue was full.
    Dropped,
    /// Client had gone away.
    Closed,
}

impl PushOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Dropped => "dropped",
            Self::Closed => "closed",
        }
    }
}

/// Record a completed refresh attempt.
pub fn record_refresh(outcome: RefreshOutcome, duration: Duration) {
    counter!("currency_refresh_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("currency_refresh_seconds").record(duration.as_secs_f64());
}

/// Update the number of currencies held in the table.
#[allow(clippy::cast_precision_loss)]
pub fn set_rates_tracked(count: usize) {
    gauge!("currency_rates_tracked").set(count as f64);
}

/// Record a unary lookup. `outcome` is `"ok"` or an error kind label.
pub fn record_lookup(outcome: &'static str) {
    counter!("currency_rate_lookups_total", "outcome" => outcome).increment(1);
}

/// Record push attempts with the given outcome.
pub fn record_pushes(outcome: PushOutcome, count: u64) {
    if count > 0 {
        counter!("currency_pushes_total", "outcome" => outcome.as_str()).increment(count);
    }
}

/// Update the open stream count.
#[allow(clippy::cast_precision_loss)]
pub fn set_stream_connections(count: i64) {
    gauge!("currency_stream_connections").set(count as f64);
}

/// Update the registered subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("currency_subscriptions").set(count as f64);
}

/// Record a refused subscription request.
pub fn record_subscription_rejected(reason: &'static str) {
    counter!("currency_subscription_rejections_total", "reason" => reason).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
