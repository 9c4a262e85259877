//! End-to-end tests: a real HTTP server backed by the in-memory broker and
//! the streaming connector as client.
//!
//! Run with: cargo test -p livetail-api --test stream_integration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use livetail_api::{create_router, AppState, SessionConfig};
use livetail_broker::{
    publish_envelope, BrokerSubscriber, EventPublisher, MemoryBroker, SubscriberFactory,
};
use livetail_client::{
    ConnectorError, ConnectorState, HttpTransport, StaticToken, StreamHandler, StreamingConnector,
};
use livetail_core::auth::JwtService;
use livetail_core::{Envelope, EventType, ThreadId};
use tokio::sync::mpsc;

const SECRET: &[u8] = b"integration-test-secret-0123";

fn jwt_service() -> JwtService {
    JwtService::new(SECRET, chrono::Duration::minutes(5)).unwrap()
}

async fn start_server(subscribers: Arc<dyn SubscriberFactory>) -> SocketAddr {
    let state = AppState::new(subscribers, jwt_service(), SessionConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Open,
    Event(Envelope),
    Close,
    Error(ConnectorError),
    Reconnecting(u32),
}

struct Recorder(mpsc::UnboundedSender<Call>);

impl StreamHandler for Recorder {
    fn on_open(&self) {
        let _ = self.0.send(Call::Open);
    }
    fn on_event(&self, envelope: Envelope) {
        let _ = self.0.send(Call::Event(envelope));
    }
    fn on_close(&self) {
        let _ = self.0.send(Call::Close);
    }
    fn on_error(&self, error: ConnectorError) {
        let _ = self.0.send(Call::Error(error));
    }
    fn on_reconnecting(&self, attempt: u32, _delay: Duration) {
        let _ = self.0.send(Call::Reconnecting(attempt));
    }
}

fn connector(addr: SocketAddr, token: String) -> (StreamingConnector, mpsc::UnboundedReceiver<Call>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = HttpTransport::new(&format!("http://{addr}")).unwrap();
    let connector = StreamingConnector::new(
        Arc::new(transport),
        Arc::new(StaticToken::new(token)),
        Arc::new(Recorder(tx)),
    );
    (connector, rx)
}

async fn next_call(rx: &mut mpsc::UnboundedReceiver<Call>) -> Call {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("handler dropped")
}

/// Poll until `check` holds; teardown runs on the server's own task
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_token_then_done_reaches_client() {
    let broker = MemoryBroker::new();
    let addr = start_server(Arc::new(broker.clone())).await;
    let token = jwt_service().sign_token("it-user").unwrap();
    let (connector, mut rx) = connector(addr, token);

    let thread_id = ThreadId::from("thread-e2e");
    connector.connect(thread_id.clone());
    assert_eq!(next_call(&mut rx).await, Call::Open);

    let hello = Envelope::new(EventType::Token, thread_id.clone(), "Hello");
    let done = Envelope::new(EventType::Done, thread_id.clone(), "");
    assert_eq!(publish_envelope(&broker, &hello).await.unwrap(), 1);
    assert_eq!(publish_envelope(&broker, &done).await.unwrap(), 1);

    assert_eq!(next_call(&mut rx).await, Call::Event(hello));
    assert_eq!(next_call(&mut rx).await, Call::Event(done));
    assert_eq!(next_call(&mut rx).await, Call::Close);

    connector.join().await;
    assert_eq!(connector.state(), ConnectorState::Closed);

    eventually(|| broker.connections_closed() == 1).await;
    assert_eq!(broker.total_subscriptions(), 0);
    assert_eq!(broker.unsubscribe_count(), 1);
}

#[tokio::test]
async fn test_carriage_return_whitespace_reaches_client() {
    let broker = MemoryBroker::new();
    let addr = start_server(Arc::new(broker.clone())).await;
    let token = jwt_service().sign_token("it-user").unwrap();
    let (connector, mut rx) = connector(addr, token);

    connector.connect(ThreadId::from("thread-cr"));
    assert_eq!(next_call(&mut rx).await, Call::Open);

    let payload = "{\"type\":\"done\",\r\"threadId\":\"thread-cr\",\r\"content\":\"bye\",\r\"ts\":7}";
    assert_eq!(broker.publish("thread:thread-cr", payload).await.unwrap(), 1);

    assert_eq!(
        next_call(&mut rx).await,
        Call::Event(Envelope::decode(payload).unwrap())
    );
    assert_eq!(next_call(&mut rx).await, Call::Close);
    connector.join().await;
}

#[tokio::test]
async fn test_invalid_credential_is_rejected_before_subscribing() {
    let broker = MemoryBroker::new();
    let addr = start_server(Arc::new(broker.clone())).await;
    let (connector, mut rx) = connector(addr, "not-a-jwt".to_string());

    connector.connect(ThreadId::from("thread-e2e"));
    assert!(matches!(
        next_call(&mut rx).await,
        Call::Error(ConnectorError::Authentication(_))
    ));

    // No reconnect loop follows
    let extra = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
    assert!(extra.is_err() || extra.unwrap().is_none());

    assert_eq!(connector.state(), ConnectorState::Closed);
    assert_eq!(broker.connections_opened(), 0);
    assert_eq!(broker.total_subscriptions(), 0);
}

#[tokio::test]
async fn test_stream_response_headers_and_open_frame() {
    let broker = MemoryBroker::new();
    let addr = start_server(Arc::new(broker.clone())).await;
    let token = jwt_service().sign_token("it-user").unwrap();

    let mut response = reqwest::Client::new()
        .get(format!("http://{addr}/api/threads/t-headers/stream?run_id=r-headers"))
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(headers["content-encoding"], "identity");

    let first = response.chunk().await.unwrap().unwrap();
    assert_eq!(first, "event: open\ndata: connected\n\n");
    assert_eq!(broker.subscriber_count("thread:t-headers"), 1);
    assert_eq!(broker.subscriber_count("agent_run:r-headers:new_response"), 1);

    drop(response);
    eventually(|| broker.total_subscriptions() == 0).await;
}

#[tokio::test]
async fn test_rejections_happen_before_subscription() {
    let broker = MemoryBroker::new();
    let addr = start_server(Arc::new(broker.clone())).await;
    let client = reqwest::Client::new();
    let token = jwt_service().sign_token("it-user").unwrap();

    let blank_thread = client
        .get(format!("http://{addr}/api/threads/%20/stream?token={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(blank_thread.status(), 400);

    let missing = client
        .get(format!("http://{addr}/api/threads/t1/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong_secret = JwtService::new(b"some-other-secret-987654", chrono::Duration::minutes(5))
        .unwrap()
        .sign_token("it-user")
        .unwrap();
    let invalid = client
        .get(format!("http://{addr}/api/threads/t1/stream?token={wrong_secret}"))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 401);
    let body: serde_json::Value = invalid.json().await.unwrap();
    assert_eq!(body["status"], 401);

    assert_eq!(broker.connections_opened(), 0);
}

struct Unavailable;

#[async_trait]
impl SubscriberFactory for Unavailable {
    async fn connect(&self) -> livetail_broker::Result<Box<dyn BrokerSubscriber>> {
        Err(livetail_broker::Error::Timeout(
            "Timed out getting Redis Pub/Sub connection".to_string(),
        ))
    }
}

#[tokio::test]
async fn test_broker_unavailable_is_503() {
    let addr = start_server(Arc::new(Unavailable)).await;
    let token = jwt_service().sign_token("it-user").unwrap();

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/threads/t1/stream?token={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Service temporarily unavailable");
}

#[tokio::test]
async fn test_health() {
    let addr = start_server(Arc::new(MemoryBroker::new())).await;
    let body = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "OK");
}
