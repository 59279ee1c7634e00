//! Application Layer - Use cases and port definitions.
//!
//! This layer wires the domain to the outside world through ports: a source
//! of upstream rates and a sink for pushing rates to connected clients.

/// Port interfaces for the upstream feed and outbound streams.
pub mod ports;

/// Refresh and broadcast services.
pub mod services;
