//! Exchange Rate Table
//!
//! Holds the latest reference rate per currency, all expressed against a
//! single implicit anchor currency (the ECB publishes rates against EUR).
//! Cross rates are derived on lookup: `rate(base → dest) = table[dest] / table[base]`.
//!
//! # Invariants
//!
//! - Every stored rate is strictly positive and finite.
//! - A currency absent from the table has never been successfully fetched.
//! - Replacement is whole-table: readers see either the previous snapshot or
//!   the new one, never a mix of both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

// =============================================================================
// Types
// =============================================================================

/// An ISO-4217 style currency code, e.g. `"EUR"`.
pub type CurrencyCode = String;

/// Raw rates keyed by currency, relative to the anchor.
pub type Rates = HashMap<CurrencyCode, f64>;

/// Normalize a client-supplied currency code (trim, upper-case).
#[must_use]
pub fn normalize_code(code: &str) -> CurrencyCode {
    code.trim().to_ascii_uppercase()
}

/// A computed cross rate between two currencies.
#[derive(Debug, Clone, PartialEq)]
pub struct RateQuote {
    /// Currency converted from.
    pub base: CurrencyCode,
    /// Currency converted into.
    pub destination: CurrencyCode,
    /// Units of `destination` per unit of `base`.
    pub rate: f64,
    /// Refresh time of the table snapshot the rate came from.
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Errors
// =============================================================================

/// Errors produced while fetching or querying rates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateError {
    /// The upstream source could not be reached or returned a non-success status.
    #[error("upstream rate source unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream response could not be parsed into currency/rate pairs.
    #[error("upstream rate source returned an unreadable document: {0}")]
    UpstreamProtocolError(String),

    /// A rate token was not a strictly positive finite number.
    #[error("invalid rate value {value:?} for currency {currency}")]
    InvalidRateValue {
        /// Currency the bad value belonged to.
        currency: CurrencyCode,
        /// The raw token as received.
        value: String,
    },

    /// Currency has no entry in the table.
    #[error("unknown currency: {0}")]
    UnknownCurrency(CurrencyCode),
}

impl RateError {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::UpstreamProtocolError(_) => "upstream_protocol_error",
            Self::InvalidRateValue { .. } => "invalid_rate_value",
            Self::UnknownCurrency(_) => "unknown_currency",
        }
    }
}

/// Parse a raw rate token, enforcing the positive-finite invariant.
///
/// # Errors
///
/// Returns [`RateError::InvalidRateValue`] if the token is not a number or is
/// zero, negative, NaN or infinite.
pub fn parse_rate(currency: &str, token: &str) -> Result<f64, RateError> {
    let invalid = || RateError::InvalidRateValue {
        currency: currency.to_string(),
        value: token.to_string(),
    };

    let rate: f64 = token.trim().parse().map_err(|_| invalid())?;
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(invalid())
    }
}

// =============================================================================
// Rate Table
// =============================================================================

fn ratio(rates: &Rates, base: &str, destination: &str) -> Result<f64, RateError> {
    let base_rate = rates
        .get(base)
        .ok_or_else(|| RateError::UnknownCurrency(base.to_string()))?;
    let destination_rate = rates
        .get(destination)
        .ok_or_else(|| RateError::UnknownCurrency(destination.to_string()))?;

    Ok(destination_rate / base_rate)
}

#[derive(Debug, Default)]
struct Snapshot {
    rates: Rates,
    updated_at: Option<DateTime<Utc>>,
}

/// Thread-safe table of the latest rates.
///
/// # Example
///
/// ```rust
/// use currency_service::domain::rates::RateTable;
///
/// let table = RateTable::from_rates([("EUR", 1.0), ("USD", 1.1), ("GBP", 0.85)]);
///
/// assert!((table.lookup("EUR", "USD").unwrap() - 1.1).abs() < 1e-12);
/// assert!(table.lookup("EUR", "JPY").is_err());
/// ```
#[derive(Debug, Default)]
pub struct RateTable {
    snapshot: RwLock<Snapshot>,
    refresh_count: AtomicU64,
}

impl RateTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table pre-populated with the given rates.
    ///
    /// Entries are taken as-is; intended for tests and fixtures.
    #[must_use]
    pub fn from_rates<I, K>(rates: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<CurrencyCode>,
    {
        let table = Self::new();
        table.replace(rates.into_iter().map(|(k, v)| (k.into(), v)).collect());
        table
    }

    /// Atomically swap in a freshly fetched set of rates.
    pub fn replace(&self, rates: Rates) {
        let mut snapshot = self.snapshot.write();
        snapshot.rates = rates;
        snapshot.updated_at = Some(Utc::now());
        drop(snapshot);
        self.refresh_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Compute the rate for converting `base` into `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::UnknownCurrency`] naming the first code that has
    /// no entry (base is checked before destination).
    pub fn lookup(&self, base: &str, destination: &str) -> Result<f64, RateError> {
        ratio(&self.snapshot.read().rates, base, destination)
    }

    /// Like [`lookup`](Self::lookup) but packages the result with its pair and
    /// the snapshot timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::UnknownCurrency`] if either code is absent.
    pub fn quote(&self, base: &str, destination: &str) -> Result<RateQuote, RateError> {
        let snapshot = self.snapshot.read();
        let rate = ratio(&snapshot.rates, base, destination)?;
        Ok(RateQuote {
            base: base.to_string(),
            destination: destination.to_string(),
            rate,
            updated_at: snapshot.updated_at,
        })
    }

    /// Whether a currency has an entry.
    #[must_use]
    pub fn contains(&self, currency: &str) -> bool {
        self.snapshot.read().rates.contains_key(currency)
    }

    /// Number of currencies in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.read().rates.len()
    }

    /// Whether the table has never been populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().rates.is_empty()
    }

    /// Time of the last successful replacement.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().updated_at
    }

    /// Number of successful replacements since startup.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
