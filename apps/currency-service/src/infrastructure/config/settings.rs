//! Service Configuration Settings
//!
//! Configuration types for the currency service, loaded from environment
//! variables. Unparseable numbers fall back to defaults; values that would make
//! the service meaningless (zero interval, empty anchor) are rejected.

use std::time::Duration;

/// Default upstream document: the ECB daily euro reference rates.
pub const DEFAULT_RATES_URL: &str = "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-daily.xml";

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// gRPC server port.
    pub grpc_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_port: 9092,
            health_port: 8083,
        }
    }
}

/// Upstream rate feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// URL of the reference-rate XML document.
    pub rates_url: String,
    /// Period between refreshes.
    pub refresh_interval: Duration,
    /// Timeout for one HTTP fetch.
    pub http_timeout: Duration,
    /// Currency all upstream rates are quoted against.
    pub anchor: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            rates_url: DEFAULT_RATES_URL.to_string(),
            refresh_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(10),
            anchor: "EUR".to_string(),
        }
    }
}

/// Streaming settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Capacity of each connection's outbound queue.
    pub buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { buffer: 256 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream rate feed settings.
    pub upstream: UpstreamSettings,
    /// Streaming settings.
    pub stream: StreamSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server = ServerSettings {
            grpc_port: parse_or("CURRENCY_GRPC_PORT", defaults.server.grpc_port, &lookup),
            health_port: parse_or("CURRENCY_HEALTH_PORT", defaults.server.health_port, &lookup),
        };

        let refresh_secs = parse_or(
            "CURRENCY_REFRESH_INTERVAL_SECS",
            defaults.upstream.refresh_interval.as_secs(),
            &lookup,
        );
        if refresh_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CURRENCY_REFRESH_INTERVAL_SECS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let timeout_secs = parse_or(
            "CURRENCY_HTTP_TIMEOUT_SECS",
            defaults.upstream.http_timeout.as_secs(),
            &lookup,
        );

        let rates_url = lookup("CURRENCY_RATES_URL").unwrap_or(defaults.upstream.rates_url);
        if rates_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("CURRENCY_RATES_URL".to_string()));
        }

        let anchor = lookup("CURRENCY_ANCHOR").map_or(defaults.upstream.anchor, |a| {
            a.trim().to_ascii_uppercase()
        });
        if anchor.is_empty() {
            return Err(ConfigError::EmptyValue("CURRENCY_ANCHOR".to_string()));
        }

        let buffer = parse_or("CURRENCY_STREAM_BUFFER", defaults.stream.buffer, &lookup);
        if buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CURRENCY_STREAM_BUFFER".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            server,
            upstream: UpstreamSettings {
                rates_url,
                refresh_interval: Duration::from_secs(refresh_secs),
                http_timeout: Duration::from_secs(timeout_secs),
                anchor,
            },
            stream: StreamSettings { buffer },
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value the service cannot run with.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Offending variable.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_or<T, F>(key: &str, default: T, lookup: &F) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.server.grpc_port, 9092);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.upstream.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.upstream.anchor, "EUR");
        assert_eq!(config.upstream.rates_url, DEFAULT_RATES_URL);
        assert_eq!(config.stream.buffer, 256);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("CURRENCY_GRPC_PORT", "7000"),
            ("CURRENCY_REFRESH_INTERVAL_SECS", "60"),
            ("CURRENCY_RATES_URL", "http://localhost:1234/rates.xml"),
            ("CURRENCY_ANCHOR", " usd "),
            ("CURRENCY_STREAM_BUFFER", "8"),
        ])
        .unwrap();

        assert_eq!(config.server.grpc_port, 7000);
        assert_eq!(config.upstream.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.upstream.rates_url, "http://localhost:1234/rates.xml");
        assert_eq!(config.upstream.anchor, "USD");
        assert_eq!(config.stream.buffer, 8);
    }

    #[test]
    fn unparseable_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("CURRENCY_GRPC_PORT", "not-a-port"),
            ("CURRENCY_HTTP_TIMEOUT_SECS", "-3"),
        ])
        .unwrap();

        assert_eq!(config.server.grpc_port, 9092);
        assert_eq!(config.upstream.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_refresh_interval_rejected() {
        let err = config_from(&[("CURRENCY_REFRESH_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CURRENCY_REFRESH_INTERVAL_SECS"));
    }

    #[test]
    fn zero_stream_buffer_rejected() {
        let err = config_from(&[("CURRENCY_STREAM_BUFFER", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn empty_anchor_and_url_rejected() {
        assert!(matches!(
            config_from(&[("CURRENCY_ANCHOR", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
        assert!(matches!(
            config_from(&[("CURRENCY_RATES_URL", "")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }
}
