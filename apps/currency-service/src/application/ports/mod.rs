//! Port Interfaces
//!
//! Defines the interfaces (ports) the application layer depends on.
//! Infrastructure adapters implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RateSource`: fetches the full set of reference rates from upstream
//! - `RateSink`: non-blocking push of one rate to one connected client

use async_trait::async_trait;

use crate::domain::rates::{RateError, RateQuote, Rates};

/// Upstream provider of reference rates.
///
/// A successful fetch returns every currency the provider published, each
/// rate strictly positive and relative to the same anchor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Fetch the latest full set of rates.
    ///
    /// # Errors
    ///
    /// - [`RateError::UpstreamUnavailable`] on transport failure or a
    ///   non-success response.
    /// - [`RateError::UpstreamProtocolError`] or [`RateError::InvalidRateValue`]
    ///   when the document cannot be turned into rates.
    async fn fetch(&self) -> Result<Rates, RateError>;
}

/// Why a push to a connection did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The connection's outbound queue is at capacity.
    #[error("outbound queue full")]
    Full,

    /// The connection has gone away.
    #[error("connection closed")]
    Closed,
}

/// Outbound handle for one streaming connection.
///
/// Implementations must not block: the broadcast step calls `push` for every
/// subscription in turn.
pub trait RateSink: Clone + Send + Sync + 'static {
    /// Enqueue a rate for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`PushError`] if the rate could not be queued.
    fn push(&self, quote: RateQuote) -> Result<(), PushError>;
}
