//! Shared harness for the gRPC integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Server};
use tonic::{Request, Streaming};

use currency_service::{
    ConnectionSink, RateError, RateRefresher, RateServer, RateServerConfig, RateSource,
    RateTable, Rates, SubscriptionRegistry,
    proto::{
        RateRequest, StreamingRateResponse, currency_service_client::CurrencyServiceClient,
        currency_service_server::CurrencyServiceServer,
    },
};

/// Upstream whose next answer the test controls.
#[derive(Clone)]
pub struct StubSource {
    next: Arc<Mutex<Result<Rates, RateError>>>,
}

impl Default for StubSource {
    fn default() -> Self {
        Self {
            next: Arc::new(Mutex::new(Ok(Rates::new()))),
        }
    }
}

impl StubSource {
    pub fn set_rates(&self, pairs: &[(&str, f64)]) {
        *self.next.lock() = Ok(pairs.iter().map(|(c, r)| ((*c).to_string(), *r)).collect());
    }

    pub fn set_error(&self, error: RateError) {
        *self.next.lock() = Err(error);
    }
}

#[async_trait]
impl RateSource for StubSource {
    async fn fetch(&self) -> Result<Rates, RateError> {
        self.next.lock().clone()
    }
}

/// A running server plus handles to drive it.
pub struct Harness {
    pub addr: SocketAddr,
    pub client: CurrencyServiceClient<Channel>,
    pub source: StubSource,
    pub table: Arc<RateTable>,
    pub registry: Arc<SubscriptionRegistry<ConnectionSink>>,
    pub refresher: Arc<RateRefresher<ConnectionSink>>,
    pub server_handle: tokio::task::JoinHandle<()>,
}

/// Start a server on a random port, loaded with EUR 1.0, USD 1.1, GBP 0.85.
pub async fn start() -> Harness {
    let source = StubSource::default();
    source.set_rates(&[("EUR", 1.0), ("USD", 1.1), ("GBP", 0.85)]);

    let table = Arc::new(RateTable::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let refresher = Arc::new(RateRefresher::new(
        Arc::clone(&table),
        Arc::clone(&registry),
        Arc::new(source.clone()),
        Duration::from_secs(3600),
    ));
    refresher.initialize().await.unwrap();

    let server = RateServer::new(
        RateServerConfig { stream_buffer: 16 },
        Arc::clone(&table),
        Arc::clone(&registry),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_handle = tokio::spawn(async move {
        Server::builder()
            .add_service(CurrencyServiceServer::new(server))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = CurrencyServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    Harness {
        addr,
        client,
        source,
        table,
        registry,
        refresher,
        server_handle,
    }
}

/// Client side of one open `SubscribeRates` stream.
pub struct RateStream {
    pub requests: mpsc::Sender<RateRequest>,
    pub responses: Streaming<StreamingRateResponse>,
}

impl RateStream {
    pub async fn open(client: &mut CurrencyServiceClient<Channel>) -> Self {
        let (requests, rx) = mpsc::channel(16);
        let responses = client
            .subscribe_rates(ReceiverStream::new(rx))
            .await
            .unwrap()
            .into_inner();
        Self {
            requests,
            responses,
        }
    }

    pub async fn subscribe(&self, base: &str, destination: &str) {
        self.requests
            .send(RateRequest {
                base: base.to_string(),
                destination: destination.to_string(),
            })
            .await
            .unwrap();
    }

    /// Next message, failing the test if none arrives within a second.
    pub async fn next(&mut self) -> StreamingRateResponse {
        tokio::time::timeout(Duration::from_secs(1), self.responses.message())
            .await
            .expect("timed out waiting for stream message")
            .unwrap()
            .expect("stream ended")
    }

    /// Assert nothing else arrives for a short while.
    pub async fn assert_quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(150), self.responses.message()).await;
        assert!(extra.is_err(), "unexpected extra message: {extra:?}");
    }
}

/// Poll until `condition` holds, failing after a second.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// `RateRequest` wire layout with `bytes` fields, so a client can put bytes
/// on the wire that the server cannot decode as UTF-8 strings.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RawRateRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub base: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub destination: Vec<u8>,
}

/// Open `SubscribeRates` with a hand-rolled client that sends [`RawRateRequest`]s.
pub async fn open_raw_stream(
    addr: SocketAddr,
) -> (mpsc::Sender<RawRateRequest>, Streaming<StreamingRateResponse>) {
    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.unwrap();

    let (requests, rx) = mpsc::channel(16);
    let codec = tonic_prost::ProstCodec::<RawRateRequest, StreamingRateResponse>::default();
    let responses = grpc
        .streaming(
            Request::new(ReceiverStream::new(rx)),
            PathAndQuery::from_static("/currency.v1.CurrencyService/SubscribeRates"),
            codec,
        )
        .await
        .unwrap()
        .into_inner();

    (requests, responses)
}
