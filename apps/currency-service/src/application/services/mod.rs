//! Application Services
//!
//! - `RateRefresher`: initial load plus the periodic refresh loop
//! - `broadcast_rates`: pushes the current table to every subscription

mod broadcast;
mod refresh;

pub use broadcast::{BroadcastReport, broadcast_rates};
pub use refresh::{RateRefresher, RefreshStats};
