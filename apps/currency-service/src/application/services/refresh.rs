//! Rate refresh.
//!
//! Loads the table once before serving, then refetches on a fixed period for
//! the life of the process. Each successful fetch replaces the table and
//! triggers a broadcast; a failed one leaves the table as it was.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::broadcast::{BroadcastReport, broadcast_rates};
use crate::application::ports::{RateSink, RateSource};
use crate::domain::rates::{RateError, RateTable, Rates};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics::{self, RefreshOutcome};

/// Bookkeeping on refresh attempts, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct RefreshStats {
    consecutive_failures: AtomicU64,
    total_failures: AtomicU64,
    last_error: RwLock<Option<String>>,
    last_attempt_at: RwLock<Option<DateTime<Utc>>>,
}

impl RefreshStats {
    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Failures since startup.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Message of the most recent failure, cleared on success.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// When the last attempt (successful or not) finished.
    #[must_use]
    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        *self.last_attempt_at.read()
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_error.write() = None;
        *self.last_attempt_at.write() = Some(Utc::now());
    }

    fn record_failure(&self, error: &RateError) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(error.to_string());
        *self.last_attempt_at.write() = Some(Utc::now());
    }
}

/// Drives the rate table from an upstream [`RateSource`].
pub struct RateRefresher<S> {
    table: Arc<RateTable>,
    registry: Arc<SubscriptionRegistry<S>>,
    source: Arc<dyn RateSource>,
    interval: Duration,
    stats: Arc<RefreshStats>,
}

impl<S: RateSink> RateRefresher<S> {
    /// Create a refresher. Nothing is fetched until [`initialize`](Self::initialize)
    /// or [`run`](Self::run).
    #[must_use]
    pub fn new(
        table: Arc<RateTable>,
        registry: Arc<SubscriptionRegistry<S>>,
        source: Arc<dyn RateSource>,
        interval: Duration,
    ) -> Self {
        Self {
            table,
            registry,
            source,
            interval,
            stats: Arc::new(RefreshStats::default()),
        }
    }

    /// Shared handle to refresh bookkeeping.
    #[must_use]
    pub fn stats(&self) -> Arc<RefreshStats> {
        Arc::clone(&self.stats)
    }

    /// Populate the table before serving.
    ///
    /// Returns the number of currencies loaded.
    ///
    /// # Errors
    ///
    /// Any fetch error is returned unchanged; the caller treats it as fatal.
    pub async fn initialize(&self) -> Result<usize, RateError> {
        let rates = self.fetch().await?;
        let count = rates.len();
        self.table.replace(rates);
        metrics::set_rates_tracked(count);
        tracing::info!(currencies = count, "Rate table loaded");
        Ok(count)
    }

    /// Fetch once and, on success, replace the table and broadcast.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the table is left untouched.
    pub async fn refresh_once(&self) -> Result<BroadcastReport, RateError> {
        let rates = self.fetch().await?;
        let count = rates.len();
        self.table.replace(rates);
        metrics::set_rates_tracked(count);

        let report = broadcast_rates(&self.table, &self.registry);
        tracing::debug!(
            currencies = count,
            pushed = report.pushed,
            dropped = report.dropped,
            disconnected = report.disconnected,
            "Rates refreshed"
        );
        Ok(report)
    }

    /// Refresh on a fixed period until `shutdown` is cancelled.
    ///
    /// The first tick fires one interval after the call. A failed tick is
    /// logged and does not move the schedule.
    pub async fn run(&self, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs_f64(), "Rate refresh loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("Rate refresh loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        tracing::warn!(
                            error = %e,
                            kind = e.kind(),
                            consecutive_failures = self.stats.consecutive_failures(),
                            "Rate refresh failed, keeping previous table"
                        );
                    }
                }
            }
        }
    }

    async fn fetch(&self) -> Result<Rates, RateError> {
        let started = Instant::now();
        let result = self.source.fetch().await.and_then(|rates| {
            if rates.is_empty() {
                return Err(RateError::UpstreamProtocolError(
                    "document contained no rates".to_string(),
                ));
            }
            if let Some((currency, rate)) = rates
                .iter()
                .find(|(_, rate)| !(rate.is_finite() && **rate > 0.0))
            {
                return Err(RateError::InvalidRateValue {
                    currency: currency.clone(),
                    value: rate.to_string(),
                });
            }
            Ok(rates)
        });

        match &result {
            Ok(_) => {
                self.stats.record_success();
                metrics::record_refresh(RefreshOutcome::Success, started.elapsed());
            }
            Err(e) => {
                self.stats.record_failure(e);
                metrics::record_refresh(RefreshOutcome::Failure, started.elapsed());
            }
        }
        result
    }
}
