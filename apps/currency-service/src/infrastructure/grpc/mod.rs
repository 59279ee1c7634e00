//! gRPC Rate Server
//!
//! Implements the `CurrencyService` gRPC service.
//!
//! # Architecture
//!
//! - `GetRate` reads the shared rate table directly.
//! - `SubscribeRates` spawns one inbound task per stream. That task validates
//!   each request and registers it in the subscription registry together with
//!   the stream's outbound queue. Rate pushes arrive on that queue from the
//!   refresh task, never from the inbound task.
//! - When the client half-closes, errors, or stops reading, the inbound task
//!   unregisters the connection.

pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod currency {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/currency.v1.rs"));
        }
    }
}

pub use server::{ConnectionSink, RateServer, RateServerConfig};
