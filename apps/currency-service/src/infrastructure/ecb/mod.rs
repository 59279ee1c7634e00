//! ECB Reference Rate Source
//!
//! Fetches the European Central Bank daily reference rates document and turns
//! it into a rate map. The document nests three levels of `Cube` elements:
//!
//! ```xml
//! <gesmes:Envelope>
//!   <Cube>
//!     <Cube time="2024-01-02">
//!       <Cube currency="USD" rate="1.0956"/>
//!       ...
//! ```
//!
//! Rates are quoted against EUR, which the document does not list; the anchor
//! is inserted at `1.0`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::RateSource;
use crate::domain::rates::{RateError, Rates, normalize_code, parse_rate};

// =============================================================================
// Document Model
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Cube")]
    cube: OuterCube,
}

#[derive(Debug, Deserialize)]
struct OuterCube {
    #[serde(rename = "Cube", default)]
    days: Vec<DailyCube>,
}

#[derive(Debug, Deserialize)]
struct DailyCube {
    #[serde(rename = "@time", default)]
    time: Option<String>,
    #[serde(rename = "Cube", default)]
    entries: Vec<RateEntry>,
}

#[derive(Debug, Deserialize)]
struct RateEntry {
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@rate")]
    rate: String,
}

/// Parse an ECB reference-rate document.
///
/// Only the first (most recent) daily cube is used. Duplicate currencies
/// within it resolve to the last entry. `anchor` is added at `1.0` if the
/// document does not list it.
///
/// # Errors
///
/// - [`RateError::UpstreamProtocolError`] if the XML is malformed, lacks the
///   nested cubes, or lists no currencies.
/// - [`RateError::InvalidRateValue`] if any rate is not a positive number.
pub fn parse_reference_rates(xml: &str, anchor: &str) -> Result<Rates, RateError> {
    let envelope: Envelope = quick_xml::de::from_str(xml)
        .map_err(|e| RateError::UpstreamProtocolError(e.to_string()))?;

    let day = envelope
        .cube
        .days
        .into_iter()
        .next()
        .ok_or_else(|| RateError::UpstreamProtocolError("no daily rate cube".to_string()))?;

    if day.entries.is_empty() {
        return Err(RateError::UpstreamProtocolError(
            "daily cube lists no currencies".to_string(),
        ));
    }

    let mut rates = Rates::with_capacity(day.entries.len() + 1);
    for entry in day.entries {
        let currency = normalize_code(&entry.currency);
        if currency.is_empty() {
            return Err(RateError::UpstreamProtocolError(
                "rate entry without currency".to_string(),
            ));
        }
        let rate = parse_rate(&currency, &entry.rate)?;
        rates.insert(currency, rate);
    }
    rates.entry(normalize_code(anchor)).or_insert(1.0);

    tracing::debug!(
        date = day.time.as_deref().unwrap_or("unknown"),
        currencies = rates.len(),
        "Parsed reference rates"
    );

    Ok(rates)
}

// =============================================================================
// HTTP Source
// =============================================================================

/// [`RateSource`] backed by the ECB daily XML document.
#[derive(Debug, Clone)]
pub struct EcbRateSource {
    client: Client,
    url: String,
    anchor: String,
}

impl EcbRateSource {
    /// Create a source for the given document URL.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built (for
    /// example when no TLS backend can be initialized).
    pub fn new(
        url: impl Into<String>,
        anchor: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("currency-service/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            anchor: anchor.into(),
        })
    }
}

#[async_trait]
impl RateSource for EcbRateSource {
    async fn fetch(&self) -> Result<Rates, RateError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RateError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RateError::UpstreamUnavailable(format!(
                "expected status 200, got {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RateError::UpstreamUnavailable(e.to_string()))?;

        parse_reference_rates(&body, &self.anchor)
    }
}

// =============================================================================
// Tests
// =============================================================================
