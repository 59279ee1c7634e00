//! Configuration Module
//!
//! Configuration loading for the currency service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_RATES_URL, ServerSettings, ServiceConfig, StreamSettings,
    UpstreamSettings,
};
