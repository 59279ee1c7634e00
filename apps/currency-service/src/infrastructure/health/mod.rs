//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, rate table status, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (always OK while the process serves HTTP)
//! - `GET /readyz` - readiness probe (rate table populated)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::RefreshStats;
use crate::domain::rates::RateTable;
use crate::infrastructure::grpc::RateServer;
use crate::infrastructure::metrics::get_metrics_handle;

/// Refresh periods that may pass without a successful fetch before the
/// service reports itself degraded.
const STALE_AFTER_INTERVALS: u32 = 3;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Rate table status.
    pub rates: RatesStatus,
    /// Streaming status.
    pub streams: StreamsStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Rates are loaded and fresh.
    Healthy,
    /// Rates are loaded but refreshes have been failing.
    Degraded,
    /// No rates loaded.
    Unhealthy,
}

/// Rate table status.
#[derive(Debug, Clone, Serialize)]
pub struct RatesStatus {
    /// Currencies in the table.
    pub currencies: usize,
    /// Time of the last successful refresh.
    pub last_refresh: Option<DateTime<Utc>>,
    /// Successful refreshes since startup.
    pub refresh_count: u64,
    /// Failed refreshes since the last success.
    pub consecutive_failures: u64,
    /// Failed refreshes since startup.
    pub total_failures: u64,
    /// When the last refresh attempt finished, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Most recent refresh error, if the last attempt failed.
    pub last_error: Option<String>,
}

/// Streaming status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamsStatus {
    /// Open `SubscribeRates` streams.
    pub active: i64,
    /// Connections holding at least one subscription.
    pub subscribed_connections: usize,
    /// Total subscriptions.
    pub subscriptions: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    refresh_interval: Duration,
    table: Arc<RateTable>,
    refresh_stats: Arc<RefreshStats>,
    grpc_server: Arc<RateServer>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        refresh_interval: Duration,
        table: Arc<RateTable>,
        refresh_stats: Arc<RefreshStats>,
        grpc_server: Arc<RateServer>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            refresh_interval,
            table,
            refresh_stats,
            grpc_server,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.table.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let now = Utc::now();
    let currencies = state.table.len();
    let last_refresh = state.table.updated_at();
    let registry = state.grpc_server.registry_stats();

    let since_refresh = last_refresh.and_then(|t| (now - t).to_std().ok());
    let status = determine_health_status(currencies, since_refresh, state.refresh_interval);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: now,
        rates: RatesStatus {
            currencies,
            last_refresh,
            refresh_count: state.table.refresh_count(),
            consecutive_failures: state.refresh_stats.consecutive_failures(),
            total_failures: state.refresh_stats.total_failures(),
            last_attempt: state.refresh_stats.last_attempt_at(),
            last_error: state.refresh_stats.last_error(),
        },
        streams: StreamsStatus {
            active: state.grpc_server.active_streams(),
            subscribed_connections: registry.connection_count,
            subscriptions: registry.subscription_count,
        },
    }
}

fn determine_health_status(
    currencies: usize,
    since_refresh: Option<Duration>,
    refresh_interval: Duration,
) -> HealthStatus {
    if currencies == 0 {
        return HealthStatus::Unhealthy;
    }

    let stale_after = refresh_interval * STALE_AFTER_INTERVALS;
    match since_refresh {
        Some(age) if age <= stale_after => HealthStatus::Healthy,
        // Clock skew can make the age negative; treat that as fresh.
        None => HealthStatus::Healthy,
        Some(_) => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockRateSource;
    use crate::application::services::RateRefresher;
    use crate::domain::rates::RateError;
    use crate::domain::subscription::SubscriptionRegistry;
    use crate::infrastructure::grpc::RateServerConfig;

    const INTERVAL: Duration = Duration::from_secs(5);

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn empty_table_is_unhealthy() {
        assert_eq!(
            determine_health_status(0, Some(Duration::ZERO), INTERVAL),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn fresh_table_is_healthy() {
        assert_eq!(
            determine_health_status(30, Some(Duration::from_secs(4)), INTERVAL),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn stale_table_is_degraded() {
        assert_eq!(
            determine_health_status(30, Some(Duration::from_secs(16)), INTERVAL),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn response_reflects_table_and_streams() {
        let table = Arc::new(RateTable::from_rates([("EUR", 1.0), ("USD", 1.1)]));
        let grpc_server = Arc::new(RateServer::new(
            RateServerConfig::default(),
            Arc::clone(&table),
            Arc::new(SubscriptionRegistry::new()),
        ));
        let state = HealthServerState::new(
            "0.1.0".to_string(),
            INTERVAL,
            table,
            Arc::new(RefreshStats::default()),
            grpc_server,
        );

        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.rates.currencies, 2);
        assert_eq!(response.rates.refresh_count, 1);
        assert_eq!(response.streams.active, 0);
        assert!(response.rates.last_error.is_none());
        assert_eq!(response.rates.total_failures, 0);
        assert!(response.rates.last_attempt.is_none());
    }

    #[tokio::test]
    async fn response_reports_refresh_failures() {
        let table = Arc::new(RateTable::from_rates([("EUR", 1.0), ("USD", 1.1)]));
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut source = MockRateSource::new();
        source
            .expect_fetch()
            .returning(|| Err(RateError::UpstreamUnavailable("timeout".into())));
        let refresher = RateRefresher::new(
            Arc::clone(&table),
            Arc::clone(&registry),
            Arc::new(source),
            INTERVAL,
        );
        let grpc_server = Arc::new(RateServer::new(
            RateServerConfig::default(),
            Arc::clone(&table),
            registry,
        ));
        let state = HealthServerState::new(
            "0.1.0".to_string(),
            INTERVAL,
            table,
            refresher.stats(),
            grpc_server,
        );

        for _ in 0..2 {
            assert!(refresher.refresh_once().await.is_err());
        }
        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.rates.consecutive_failures, 2);
        assert_eq!(response.rates.total_failures, 2);
        assert!(response.rates.last_attempt.is_some());
        assert!(response.rates.last_error.unwrap().contains("timeout"));
    }
}
