#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Currency Service - Exchange Rate Distribution
//!
//! A gRPC service that keeps the latest reference exchange rates in memory,
//! answers point lookups between any two known currencies, and pushes fresh
//! rates to clients that subscribed to currency pairs over a long-lived
//! stream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: rate table and subscription bookkeeping
//!   - `rates`: rate map, cross-rate derivation, rate errors
//!   - `subscription`: per-connection subscription registry
//!
//! - **Application**: use cases and port definitions
//!   - `ports`: `RateSource` (upstream) and `RateSink` (per-client push)
//!   - `services`: startup load, refresh loop, broadcast
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `ecb`: HTTP + XML client for the ECB daily document
//!   - `grpc`: `CurrencyService` server
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!  ECB XML ──► RateRefresher ──► RateTable ◄── GetRate ◄── Client
//!                   │
//!                   └─► broadcast ──► SubscriptionRegistry ──► per-stream queue ──► Client
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Rate table and subscriptions with no transport knowledge.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::rates::{CurrencyCode, RateError, RateQuote, RateTable, Rates};
pub use domain::subscription::{
    ConnectionId, RegistryStats, SubscribeError, Subscription, SubscriptionRegistry,
};

// Application
pub use application::ports::{PushError, RateSink, RateSource};
pub use application::services::{BroadcastReport, RateRefresher, RefreshStats, broadcast_rates};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig};

// Upstream source
pub use infrastructure::ecb::EcbRateSource;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{
    ConnectionSink, RateServer, RateServerConfig, proto::currency::v1 as proto,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
