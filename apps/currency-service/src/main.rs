//! Currency Service Binary
//!
//! Loads the reference rate table, then serves `CurrencyService` over gRPC
//! while refreshing rates in the background.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin currency-service
//! ```
//!
//! # Environment Variables
//!
//! - `CURRENCY_GRPC_PORT`: gRPC server port (default: 9092)
//! - `CURRENCY_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `CURRENCY_RATES_URL`: Reference rate document (default: ECB daily XML)
//! - `CURRENCY_REFRESH_INTERVAL_SECS`: Refresh period (default: 5)
//! - `CURRENCY_HTTP_TIMEOUT_SECS`: Upstream request timeout (default: 10)
//! - `CURRENCY_ANCHOR`: Currency upstream rates are quoted against (default: EUR)
//! - `CURRENCY_STREAM_BUFFER`: Per-stream outbound queue size (default: 256)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: currency-service)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use currency_service::infrastructure::grpc::proto::currency::v1::currency_service_server::CurrencyServiceServer;
use currency_service::infrastructure::telemetry;
use currency_service::{
    EcbRateSource, HealthServer, HealthServerState, RateRefresher, RateServer, RateServerConfig,
    RateTable, ServiceConfig, SubscriptionRegistry, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Currency Service");

    let _metrics_handle = init_metrics()?;

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let table = Arc::new(RateTable::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let source = Arc::new(EcbRateSource::new(
        config.upstream.rates_url.clone(),
        config.upstream.anchor.clone(),
        config.upstream.http_timeout,
    )?);

    let refresher = Arc::new(RateRefresher::new(
        Arc::clone(&table),
        Arc::clone(&registry),
        source,
        config.upstream.refresh_interval,
    ));

    // Serving without rates is pointless
    if let Err(e) = refresher.initialize().await {
        tracing::error!(error = %e, kind = e.kind(), "Unable to load initial rates");
        return Err(e.into());
    }

    let grpc_server = Arc::new(RateServer::new(
        RateServerConfig {
            stream_buffer: config.stream.buffer,
        },
        Arc::clone(&table),
        Arc::clone(&registry),
    ));

    // Spawn refresh loop
    let refresh_task = Arc::clone(&refresher);
    let refresh_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        refresh_task.run(refresh_shutdown).await;
    });

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.upstream.refresh_interval,
        Arc::clone(&table),
        refresher.stats(),
        Arc::clone(&grpc_server),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn gRPC server
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.server.grpc_port));
    let grpc_service = CurrencyServiceServer::from_arc(grpc_server);
    let grpc_shutdown = shutdown_token.clone();

    let grpc_handle = tokio::spawn(async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        if let Err(e) = Server::builder()
            .add_service(grpc_service)
            .serve_with_shutdown(grpc_addr, grpc_shutdown.cancelled())
            .await
        {
            tracing::error!(error = %e, "gRPC server error");
        }
        tracing::info!("gRPC server stopped");
    });

    tracing::info!("Currency service ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, grpc_handle).await.is_err() {
        tracing::warn!("gRPC server did not stop within shutdown timeout");
    }

    tracing::info!("Currency service stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        grpc_port = config.server.grpc_port,
        health_port = config.server.health_port,
        refresh_interval_secs = config.upstream.refresh_interval.as_secs(),
        anchor = %config.upstream.anchor,
        stream_buffer = config.stream.buffer,
        "Configuration loaded"
    );
    tracing::debug!(rates_url = %config.upstream.rates_url, "Upstream endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
