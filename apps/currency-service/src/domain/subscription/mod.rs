//! Subscription Registry
//!
//! Tracks, per open streaming connection, the currency pairs that connection
//! wants pushed on every rate refresh, together with the connection's outbound
//! handle.
//!
//! # Design
//!
//! The registry is the one structure shared by every connection's inbound
//! reader (which adds pairs) and the broadcast step (which walks all pairs and
//! pushes). It is guarded by a single `RwLock`:
//!
//! - `subscribe` / `unregister` take the write lock briefly.
//! - Traversal copies each connection's entry under the read lock and releases
//!   it before any push happens, so a slow push never blocks admission.
//!
//! The outbound handle type `S` is opaque here; the gRPC layer supplies a
//! channel-backed sink.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::rates::CurrencyCode;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a streaming connection.
pub type ConnectionId = u64;

/// One (base, destination) pair a connection wants pushed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Currency converted from.
    pub base: CurrencyCode,
    /// Currency converted into.
    pub destination: CurrencyCode,
}

impl Subscription {
    /// Create a subscription for the given pair.
    #[must_use]
    pub fn new(base: impl Into<CurrencyCode>, destination: impl Into<CurrencyCode>) -> Self {
        Self {
            base: base.into(),
            destination: destination.into(),
        }
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.destination)
    }
}

/// Reasons a subscription request is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// Base and destination are the same currency.
    #[error("base currency {0} cannot be the same as the destination currency")]
    InvalidArgument(CurrencyCode),

    /// The connection already has this exact pair.
    #[error("subscription for {0} already exists")]
    DuplicateSubscription(Subscription),
}

impl SubscribeError {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::DuplicateSubscription(_) => "duplicate_subscription",
        }
    }
}

/// A connection's registered state.
#[derive(Debug, Clone)]
struct ConnectionEntry<S> {
    outbound: S,
    subscriptions: Vec<Subscription>,
}

/// Point-in-time copy of one connection's entry, handed to the broadcast step.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot<S> {
    /// Connection the entry belongs to.
    pub connection: ConnectionId,
    /// Handle used to push to the connection.
    pub outbound: S,
    /// Subscriptions in the order they were admitted.
    pub subscriptions: Vec<Subscription>,
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe registry of streaming subscriptions.
///
/// # Example
///
/// ```rust
/// use currency_service::domain::subscription::{SubscribeError, Subscription, SubscriptionRegistry};
///
/// let registry: SubscriptionRegistry<()> = SubscriptionRegistry::new();
///
/// registry.subscribe(1, &(), Subscription::new("EUR", "USD")).unwrap();
///
/// // Same pair again on the same connection is refused
/// let err = registry.subscribe(1, &(), Subscription::new("EUR", "USD")).unwrap_err();
/// assert!(matches!(err, SubscribeError::DuplicateSubscription(_)));
///
/// // A disconnect drops everything for that connection
/// registry.unregister(1);
/// assert_eq!(registry.subscription_count(), 0);
/// ```
pub struct SubscriptionRegistry<S> {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry<S>>>,
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for SubscriptionRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

impl<S> SubscriptionRegistry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Remove every subscription for a terminated connection.
    ///
    /// Returns the number of subscriptions removed. Calling it for an unknown
    /// or already-removed connection is a no-op.
    pub fn unregister(&self, connection: ConnectionId) -> usize {
        self.connections
            .write()
            .remove(&connection)
            .map_or(0, |entry| entry.subscriptions.len())
    }

    /// Whether the connection currently has an entry.
    #[must_use]
    pub fn is_registered(&self, connection: ConnectionId) -> bool {
        self.connections.read().contains_key(&connection)
    }

    /// Subscriptions for a specific connection, in admission order.
    #[must_use]
    pub fn subscriptions(&self, connection: ConnectionId) -> Vec<Subscription> {
        self.connections
            .read()
            .get(&connection)
            .map(|entry| entry.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Number of connections with at least one subscription.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Total subscriptions across all connections.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .map(|entry| entry.subscriptions.len())
            .sum()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let connections = self.connections.read();
        RegistryStats {
            connection_count: connections.len(),
            subscription_count: connections.values().map(|e| e.subscriptions.len()).sum(),
        }
    }
}

impl<S: Clone> SubscriptionRegistry<S> {
    /// Admit a subscription for a connection.
    ///
    /// Creates the connection's entry (remembering `outbound`) on its first
    /// valid subscription.
    ///
    /// # Errors
    ///
    /// - [`SubscribeError::InvalidArgument`] if base equals destination.
    /// - [`SubscribeError::DuplicateSubscription`] if the connection already
    ///   has the identical pair.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        outbound: &S,
        subscription: Subscription,
    ) -> Result<(), SubscribeError> {
        if subscription.base == subscription.destination {
            return Err(SubscribeError::InvalidArgument(subscription.base));
        }

        let mut connections = self.connections.write();
        let entry = connections
            .entry(connection)
            .or_insert_with(|| ConnectionEntry {
                outbound: outbound.clone(),
                subscriptions: Vec::new(),
            });

        if entry.subscriptions.contains(&subscription) {
            return Err(SubscribeError::DuplicateSubscription(subscription));
        }

        entry.subscriptions.push(subscription);
        Ok(())
    }

    /// Copy out every connection's entry.
    ///
    /// Each snapshot is consistent for its connection; the set of connections
    /// reflects the moment the read lock was held.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot<S>> {
        self.connections
            .read()
            .iter()
            .map(|(id, entry)| ConnectionSnapshot {
                connection: *id,
                outbound: entry.outbound.clone(),
                subscriptions: entry.subscriptions.clone(),
            })
            .collect()
    }

    /// Visit every registered (connection, subscription) pair.
    ///
    /// The visitor runs without the registry lock held, so it may call
    /// [`unregister`](Self::unregister). Returning [`Visit::SkipConnection`]
    /// stops visiting the remaining subscriptions of that connection.
    pub fn for_each_subscription<F>(&self, mut visitor: F)
    where
        F: FnMut(ConnectionId, &S, &Subscription) -> Visit,
    {
        for snapshot in self.snapshot() {
            for subscription in &snapshot.subscriptions {
                if visitor(snapshot.connection, &snapshot.outbound, subscription)
                    == Visit::SkipConnection
                {
                    break;
                }
            }
        }
    }
}

/// Visitor control flow for [`SubscriptionRegistry::for_each_subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep going with this connection's next subscription.
    Continue,
    /// Abandon the rest of this connection's subscriptions.
    SkipConnection,
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Connections with at least one subscription.
    pub connection_count: usize,
    /// Subscriptions across all connections.
    pub subscription_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SubscriptionRegistry<&'static str> {
        SubscriptionRegistry::new()
    }

    #[test]
    fn subscribe_creates_connection_entry() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();

        assert!(registry.is_registered(1));
        assert_eq!(registry.subscriptions(1), vec![Subscription::new("EUR", "USD")]);
    }

    #[test]
    fn subscribe_same_currency_rejected() {
        let registry = registry();

        let err = registry
            .subscribe(1, &"conn-1", Subscription::new("GBP", "GBP"))
            .unwrap_err();

        assert_eq!(err, SubscribeError::InvalidArgument("GBP".to_string()));
        // Rejected requests never create an entry
        assert!(!registry.is_registered(1));
    }

    #[test]
    fn subscribe_duplicate_rejected_and_single_entry_kept() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();
        let err = registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap_err();

        assert_eq!(
            err,
            SubscribeError::DuplicateSubscription(Subscription::new("EUR", "USD"))
        );
        assert_eq!(registry.subscription_count(), 1);
    }

    #[test]
    fn reverse_pair_is_distinct() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();
        registry
            .subscribe(1, &"conn-1", Subscription::new("USD", "EUR"))
            .unwrap();

        assert_eq!(registry.subscriptions(1).len(), 2);
    }

    #[test]
    fn same_pair_on_different_connections_allowed() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();
        registry
            .subscribe(2, &"conn-2", Subscription::new("EUR", "USD"))
            .unwrap();

        assert_eq!(
            registry.stats(),
            RegistryStats {
                connection_count: 2,
                subscription_count: 2,
            }
        );
    }

    #[test]
    fn subscriptions_keep_admission_order() {
        let registry = registry();

        for dest in ["USD", "GBP", "JPY"] {
            registry
                .subscribe(1, &"conn-1", Subscription::new("EUR", dest))
                .unwrap();
        }

        let destinations: Vec<_> = registry
            .subscriptions(1)
            .into_iter()
            .map(|s| s.destination)
            .collect();
        assert_eq!(destinations, vec!["USD", "GBP", "JPY"]);
    }

    #[test]
    fn unregister_removes_everything_and_is_idempotent() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();
        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "GBP"))
            .unwrap();

        assert_eq!(registry.unregister(1), 2);
        assert_eq!(registry.unregister(1), 0);
        assert!(!registry.is_registered(1));
        assert!(registry.subscriptions(1).is_empty());
    }

    #[test]
    fn unregister_preserves_other_connections() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();
        registry
            .subscribe(2, &"conn-2", Subscription::new("EUR", "USD"))
            .unwrap();

        registry.unregister(1);

        assert!(registry.is_registered(2));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn outbound_handle_is_first_one_seen() {
        let registry = registry();

        registry
            .subscribe(1, &"first", Subscription::new("EUR", "USD"))
            .unwrap();
        registry
            .subscribe(1, &"second", Subscription::new("EUR", "GBP"))
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].outbound, "first");
    }

    #[test]
    fn for_each_visits_every_pair() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();
        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "GBP"))
            .unwrap();
        registry
            .subscribe(2, &"conn-2", Subscription::new("USD", "JPY"))
            .unwrap();

        let mut seen = Vec::new();
        registry.for_each_subscription(|connection, outbound, subscription| {
            seen.push((connection, *outbound, subscription.to_string()));
            Visit::Continue
        });
        seen.sort();

        assert_eq!(
            seen,
            vec![
                (1, "conn-1", "EUR/GBP".to_string()),
                (1, "conn-1", "EUR/USD".to_string()),
                (2, "conn-2", "USD/JPY".to_string()),
            ]
        );
    }

    #[test]
    fn for_each_skip_connection_stops_that_connection_only() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();
        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "GBP"))
            .unwrap();
        registry
            .subscribe(2, &"conn-2", Subscription::new("USD", "JPY"))
            .unwrap();

        let mut visits = HashMap::new();
        registry.for_each_subscription(|connection, _, _| {
            *visits.entry(connection).or_insert(0) += 1;
            Visit::SkipConnection
        });

        assert_eq!(visits.get(&1), Some(&1));
        assert_eq!(visits.get(&2), Some(&1));
    }

    #[test]
    fn for_each_tolerates_unregister_from_visitor() {
        let registry = registry();

        registry
            .subscribe(1, &"conn-1", Subscription::new("EUR", "USD"))
            .unwrap();
        registry
            .subscribe(2, &"conn-2", Subscription::new("EUR", "USD"))
            .unwrap();

        // Would deadlock if the visitor ran under the registry lock
        registry.for_each_subscription(|connection, _, _| {
            registry.unregister(connection);
            Visit::SkipConnection
        });

        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn thread_safety_concurrent_subscribe_and_unregister() {
        use std::sync::Arc;
        use std::thread;

        let registry: Arc<SubscriptionRegistry<u64>> = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10u64 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.subscribe(i, &i, Subscription::new("EUR", "USD")).unwrap();
                r.subscribe(i, &i, Subscription::new("EUR", format!("C{i:02}")))
                    .unwrap();
                if i % 2 == 0 {
                    r.unregister(i);
                }
            }));
        }

        // Traverse while writers are active
        for _ in 0..100 {
            registry.for_each_subscription(|_, _, _| Visit::Continue);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.connection_count, 5);
        assert_eq!(stats.subscription_count, 10);
    }
}
