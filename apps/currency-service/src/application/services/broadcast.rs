//! Rate broadcast.
//!
//! After every successful refresh, every registered subscription gets the
//! freshly computed rate pushed to its connection, whether or not the number
//! changed.

use crate::application::ports::{PushError, RateSink};
use crate::domain::rates::RateTable;
use crate::domain::subscription::{SubscriptionRegistry, Visit};
use crate::infrastructure::metrics::{self, PushOutcome};

/// Counts from one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Rates queued to a client.
    pub pushed: u64,
    /// Rates dropped because the client's queue was full.
    pub dropped: u64,
    /// Subscriptions skipped because a currency is not in the table.
    pub failed_lookups: u64,
    /// Connections found closed and unregistered.
    pub disconnected: u64,
}

/// Push the current rate for every registered subscription.
///
/// A closed connection is unregistered and the rest of its subscriptions are
/// skipped. A full queue drops that one push. Neither affects other
/// connections.
pub fn broadcast_rates<S: RateSink>(
    table: &RateTable,
    registry: &SubscriptionRegistry<S>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    registry.for_each_subscription(|connection, sink, subscription| {
        let quote = match table.quote(&subscription.base, &subscription.destination) {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!(
                    connection,
                    subscription = %subscription,
                    error = %e,
                    "Skipping push for subscription"
                );
                report.failed_lookups += 1;
                return Visit::Continue;
            }
        };

        match sink.push(quote) {
            Ok(()) => {
                report.pushed += 1;
                Visit::Continue
            }
            Err(PushError::Full) => {
                tracing::warn!(
                    connection,
                    subscription = %subscription,
                    "Slow consumer, dropping rate push"
                );
                report.dropped += 1;
                Visit::Continue
            }
            Err(PushError::Closed) => {
                let removed = registry.unregister(connection);
                tracing::info!(
                    connection,
                    removed,
                    "Connection closed during broadcast, unregistered"
                );
                report.disconnected += 1;
                Visit::SkipConnection
            }
        }
    });

    metrics::record_pushes(PushOutcome::Sent, report.pushed);
    metrics::record_pushes(PushOutcome::Dropped, report.dropped);
    metrics::record_pushes(PushOutcome::Closed, report.disconnected);
    metrics::set_subscriptions(registry.subscription_count());

    report
}
