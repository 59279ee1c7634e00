//! gRPC Rate Server Implementation
//!
//! Implements the `CurrencyService` gRPC service: unary `GetRate` and the
//! bidirectional `SubscribeRates` stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Request, Response, Status, Streaming};
use tonic_types::{ErrorDetails, StatusExt};

use super::proto::currency::v1::{
    RateRequest, RateResponse, StreamingRateResponse, SubscriptionError,
    currency_service_server::CurrencyService, streaming_rate_response::Message,
};
use crate::application::ports::{PushError, RateSink};
use crate::domain::rates::{RateError, RateQuote, RateTable, normalize_code};
use crate::domain::subscription::{
    ConnectionId, RegistryStats, SubscribeError, Subscription, SubscriptionRegistry,
};
use crate::infrastructure::metrics;

/// `ErrorInfo.domain` attached to every rich error.
pub const ERROR_DOMAIN: &str = "currency.v1";

/// `ErrorInfo.reason` for a request whose base and destination are equal.
pub const REASON_SAME_CURRENCY: &str = "SAME_CURRENCY";

/// `ErrorInfo.reason` for a currency missing from the table.
pub const REASON_UNKNOWN_CURRENCY: &str = "UNKNOWN_CURRENCY";

// =============================================================================
// Type Aliases
// =============================================================================

type RpcResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;
type Outbound = mpsc::Sender<Result<StreamingRateResponse, Status>>;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the gRPC rate server.
#[derive(Debug, Clone)]
pub struct RateServerConfig {
    /// Capacity of each stream's outbound queue.
    pub stream_buffer: usize,
}

impl Default for RateServerConfig {
    fn default() -> Self {
        Self { stream_buffer: 256 }
    }
}

// =============================================================================
// Connection Sink
// =============================================================================

/// Outbound half of one `SubscribeRates` stream.
///
/// Pushes never wait: a full queue is reported back to the broadcaster rather
/// than stalling it.
#[derive(Debug, Clone)]
pub struct ConnectionSink {
    tx: Outbound,
}

impl ConnectionSink {
    /// Wrap the sending side of a stream's outbound queue.
    #[must_use]
    pub const fn new(tx: Outbound) -> Self {
        Self { tx }
    }
}

impl RateSink for ConnectionSink {
    fn push(&self, quote: RateQuote) -> Result<(), PushError> {
        let message = StreamingRateResponse {
            message: Some(Message::RateResponse(quote_to_proto(&quote))),
        };
        self.tx.try_send(Ok(message)).map_err(|e| match e {
            TrySendError::Full(_) => PushError::Full,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

/// gRPC server for rate lookups and rate streams.
pub struct RateServer {
    config: RateServerConfig,
    table: Arc<RateTable>,
    registry: Arc<SubscriptionRegistry<ConnectionSink>>,
    active_streams: Arc<AtomicI64>,
    next_connection: AtomicU64,
}

impl RateServer {
    /// Create a new gRPC rate server.
    #[must_use]
    pub fn new(
        config: RateServerConfig,
        table: Arc<RateTable>,
        registry: Arc<SubscriptionRegistry<ConnectionSink>>,
    ) -> Self {
        Self {
            config,
            table,
            registry,
            active_streams: Arc::new(AtomicI64::new(0)),
            next_connection: AtomicU64::new(1),
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of open `SubscribeRates` streams.
    #[must_use]
    pub fn active_streams(&self) -> i64 {
        self.active_streams.load(Ordering::Relaxed)
    }

    /// Subscription registry statistics.
    #[must_use]
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

#[tonic::async_trait]
impl CurrencyService for RateServer {
    type SubscribeRatesStream = BoxedStream<StreamingRateResponse>;

    async fn get_rate(&self, request: Request<RateRequest>) -> RpcResult<RateResponse> {
        let req = request.into_inner();
        let base = normalize_code(&req.base);
        let destination = normalize_code(&req.destination);

        tracing::debug!(base = %base, destination = %destination, "Handle GetRate");

        if base == destination {
            metrics::record_lookup("invalid_argument");
            return Err(same_currency_status(&base, &destination));
        }

        match self.table.quote(&base, &destination) {
            Ok(quote) => {
                metrics::record_lookup("ok");
                Ok(Response::new(quote_to_proto(&quote)))
            }
            Err(e) => {
                metrics::record_lookup(e.kind());
                Err(rate_error_status(&e, &base, &destination))
            }
        }
    }

    async fn subscribe_rates(
        &self,
        request: Request<Streaming<RateRequest>>,
    ) -> RpcResult<Self::SubscribeRatesStream> {
        let mut inbound = request.into_inner();
        let connection = self.next_connection_id();

        let (tx, rx) = mpsc::channel(self.config.stream_buffer);
        let sink = ConnectionSink::new(tx);
        let registry = Arc::clone(&self.registry);
        let active_streams = Arc::clone(&self.active_streams);

        metrics::set_stream_connections(active_streams.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::info!(connection, "Rate stream opened");

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    msg = inbound.message() => msg,
                    () = sink.tx.closed() => {
                        tracing::info!(connection, "Client stopped receiving");
                        break;
                    }
                };

                match next {
                    Ok(Some(req)) => {
                        if !handle_subscribe(connection, &sink, &registry, req).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!(connection, "Client closed rate stream");
                        break;
                    }
                    Err(status) => {
                        tracing::warn!(connection, error = %status, "Rate stream read failed");
                        if sink.tx.send(Err(status)).await.is_err() {
                            tracing::debug!(connection, "Stream already gone");
                        }
                        break;
                    }
                }
            }

            let removed = registry.unregister(connection);
            metrics::set_subscriptions(registry.subscription_count());
            metrics::set_stream_connections(active_streams.fetch_sub(1, Ordering::Relaxed) - 1);
            tracing::info!(connection, removed, "Rate stream closed");
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as Self::SubscribeRatesStream))
    }
}

/// Register one inbound request, answering rejections in-band.
///
/// Returns `false` once the client can no longer be written to.
async fn handle_subscribe(
    connection: ConnectionId,
    sink: &ConnectionSink,
    registry: &SubscriptionRegistry<ConnectionSink>,
    req: RateRequest,
) -> bool {
    let subscription = Subscription::new(normalize_code(&req.base), normalize_code(&req.destination));

    match registry.subscribe(connection, sink, subscription.clone()) {
        Ok(()) => {
            metrics::set_subscriptions(registry.subscription_count());
            tracing::debug!(connection, subscription = %subscription, "Subscribed");
            true
        }
        Err(e) => {
            metrics::record_subscription_rejected(e.kind());
            tracing::info!(
                connection,
                subscription = %subscription,
                error = %e,
                "Subscription rejected"
            );
            let message = StreamingRateResponse {
                message: Some(Message::Error(subscription_error_to_proto(&e, req))),
            };
            sink.tx.send(Ok(message)).await.is_ok()
        }
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

fn same_currency_status(base: &str, destination: &str) -> Status {
    let mut details = ErrorDetails::with_bad_request_violation(
        "destination",
        "base and destination currencies must differ",
    );
    details.set_error_info(
        REASON_SAME_CURRENCY,
        ERROR_DOMAIN,
        HashMap::from([
            ("base".to_string(), base.to_string()),
            ("destination".to_string(), destination.to_string()),
        ]),
    );

    Status::with_error_details(
        Code::InvalidArgument,
        format!("base currency {base} cannot be the same as the destination currency {destination}"),
        details,
    )
}

fn rate_error_status(error: &RateError, base: &str, destination: &str) -> Status {
    match error {
        RateError::UnknownCurrency(currency) => {
            let details = ErrorDetails::with_error_info(
                REASON_UNKNOWN_CURRENCY,
                ERROR_DOMAIN,
                HashMap::from([
                    ("currency".to_string(), currency.clone()),
                    ("base".to_string(), base.to_string()),
                    ("destination".to_string(), destination.to_string()),
                ]),
            );
            Status::with_error_details(Code::NotFound, error.to_string(), details)
        }
        RateError::UpstreamUnavailable(_)
        | RateError::UpstreamProtocolError(_)
        | RateError::InvalidRateValue { .. } => Status::unavailable(error.to_string()),
    }
}

fn subscription_error_to_proto(error: &SubscribeError, request: RateRequest) -> SubscriptionError {
    let code = match error {
        SubscribeError::InvalidArgument(_) => Code::InvalidArgument,
        SubscribeError::DuplicateSubscription(_) => Code::AlreadyExists,
    };
    SubscriptionError {
        code: i32::from(code),
        message: error.to_string(),
        request: Some(request),
    }
}

// =============================================================================
// Conversion Functions
// =============================================================================

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(i32::MAX),
    }
}

fn quote_to_proto(quote: &RateQuote) -> RateResponse {
    RateResponse {
        base: quote.base.clone(),
        destination: quote.destination.clone(),
        rate: quote.rate,
        updated_at: quote.updated_at.map(datetime_to_timestamp),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> RateServer {
        RateServer::new(
            RateServerConfig::default(),
            Arc::new(RateTable::from_rates([("EUR", 1.0), ("USD", 1.1), ("GBP", 0.85)])),
            Arc::new(SubscriptionRegistry::new()),
        )
    }

    fn request(base: &str, destination: &str) -> Request<RateRequest> {
        Request::new(RateRequest {
            base: base.to_string(),
            destination: destination.to_string(),
        })
    }

    #[tokio::test]
    async fn get_rate_returns_cross_rate() {
        let response = server().get_rate(request("USD", "GBP")).await.unwrap().into_inner();

        assert_eq!(response.base, "USD");
        assert_eq!(response.destination, "GBP");
        assert!((response.rate - 0.85 / 1.1).abs() < 1e-12);
        assert!(response.updated_at.is_some());
    }

    #[tokio::test]
    async fn get_rate_normalizes_codes() {
        let response = server().get_rate(request(" eur", "usd ")).await.unwrap().into_inner();

        assert_eq!(response.base, "EUR");
        assert!((response.rate - 1.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn get_rate_same_currency_is_invalid_argument_with_details() {
        let status = server().get_rate(request("XXX", "xxx")).await.unwrap_err();

        assert_eq!(status.code(), Code::InvalidArgument);
        let details = status.get_error_details();
        let info = details.error_info().unwrap();
        assert_eq!(info.reason, REASON_SAME_CURRENCY);
        assert_eq!(info.metadata.get("base").map(String::as_str), Some("XXX"));
        assert!(details.bad_request().is_some());
    }

    #[tokio::test]
    async fn get_rate_unknown_currency_is_not_found() {
        let status = server().get_rate(request("EUR", "JPY")).await.unwrap_err();

        assert_eq!(status.code(), Code::NotFound);
        let details = status.get_error_details();
        let info = details.error_info().unwrap();
        assert_eq!(info.reason, REASON_UNKNOWN_CURRENCY);
        assert_eq!(info.metadata.get("currency").map(String::as_str), Some("JPY"));
    }

    #[test]
    fn connection_ids_are_unique_per_server() {
        let server = server();
        let ids: std::collections::HashSet<_> =
            (0..1_000).map(|_| server.next_connection_id()).collect();

        assert_eq!(ids.len(), 1_000);
        assert!(!ids.contains(&0));
    }

    #[test]
    fn sink_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sink = ConnectionSink::new(tx);
        let quote = RateQuote {
            base: "EUR".into(),
            destination: "USD".into(),
            rate: 1.1,
            updated_at: None,
        };

        assert_eq!(sink.push(quote.clone()), Ok(()));
        assert_eq!(sink.push(quote.clone()), Err(PushError::Full));

        drop(rx);
        assert_eq!(sink.push(quote), Err(PushError::Closed));
    }

    #[test]
    fn subscription_errors_map_to_codes() {
        let req = RateRequest {
            base: "EUR".into(),
            destination: "USD".into(),
        };

        let dup = subscription_error_to_proto(
            &SubscribeError::DuplicateSubscription(Subscription::new("EUR", "USD")),
            req.clone(),
        );
        assert_eq!(dup.code, i32::from(Code::AlreadyExists));
        assert_eq!(dup.request, Some(req.clone()));

        let same = subscription_error_to_proto(&SubscribeError::InvalidArgument("EUR".into()), req);
        assert_eq!(same.code, i32::from(Code::InvalidArgument));
    }

    #[test]
    fn datetime_conversion() {
        let dt = Utc::now();
        let ts = datetime_to_timestamp(dt);
        let expected_nanos = i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(i32::MAX);

        assert_eq!(ts.seconds, dt.timestamp());
        assert_eq!(ts.nanos, expected_nanos);
    }
}
