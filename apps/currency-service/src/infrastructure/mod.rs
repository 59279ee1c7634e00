//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process-level
//! plumbing (configuration, telemetry, metrics, health).

/// ECB reference-rate HTTP source.
pub mod ecb;

/// gRPC rate server implementation.
pub mod grpc;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
