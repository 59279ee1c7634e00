//! Domain Layer - Rate table and subscription bookkeeping.
//!
//! This layer has no knowledge of gRPC or HTTP. Everything here is plain
//! Rust guarded by `parking_lot` locks.

/// Exchange rate table and cross-rate derivation.
pub mod rates;

/// Per-connection subscription tracking.
pub mod subscription;
