//! Query API integration tests
//!
//! Serve the API on an ephemeral local port and query it over HTTP.

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use bridge_relayer::api::{self, ApiState};
use bridge_relayer::retry_queue::RetryQueue;
use bridge_relayer::status::StatusStore;
use bridge_relayer::types::{BridgeEvent, EventKind, FailedOperation};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TestServer {
    base_url: String,
    status: StatusStore,
    retry_queue: RetryQueue,
    cancel: CancellationToken,
    handle: JoinHandle<eyre::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let status = StatusStore::new();
        let retry_queue = RetryQueue::new();
        let cancel = CancellationToken::new();

        let state = ApiState {
            status: status.clone(),
            retry_queue: retry_queue.clone(),
        };
        let handle = tokio::spawn(api::serve(listener, state, cancel.clone()));

        Self {
            base_url,
            status,
            retry_queue,
            cancel,
            handle,
        }
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}{}", self.base_url, path))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn locked_event(seed: u8) -> BridgeEvent {
    BridgeEvent {
        kind: EventKind::Locked,
        source_chain: 11155111,
        destination_chain: 84532,
        sender: Address::repeat_byte(0x11),
        recipient: Address::repeat_byte(0x22),
        amount: U256::from(1_000_000_000_000_000_000u128),
        nonce: U256::from(7),
        source_tx_hash: B256::repeat_byte(seed),
        log_index: 0,
        block_number: Some(1),
        wrapped_token: None,
    }
}

fn assert_no_cache(response: &reqwest::Response) {
    let headers = response.headers();
    assert_eq!(
        headers["cache-control"],
        "no-store, no-cache, must-revalidate, proxy-revalidate"
    );
    assert_eq!(headers["pragma"], "no-cache");
    assert_eq!(headers["expires"], "0");
    assert_eq!(headers["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;

    let response = server.get("/health").await;
    assert_eq!(response.status(), 200);
    assert_no_cache(&response);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert!(body["timestamp"].as_i64().unwrap() > 0);

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_status_reads_pending() {
    let server = TestServer::start().await;

    let response = server.get("/status/0x1234").await;
    assert_eq!(response.status(), 200);
    assert_no_cache(&response);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    assert!(body.get("destTxHash").is_none());
    assert!(body.get("error").is_none());
    assert!(body["timestamp"].is_i64());

    server.stop().await;
}

#[tokio::test]
async fn test_status_lookup_ignores_hash_case() {
    let server = TestServer::start().await;
    let event = locked_event(0xab);
    let key = event.status_key();
    server.status.mark_processing(&key).await;
    server.status.mark_complete(&key, "0xdest").await;

    let body = server.get_json(&format!("/status/{}", key.to_uppercase().replacen("0X", "0x", 1))).await;
    assert_eq!(body["status"], "complete");
    assert_eq!(body["destTxHash"], "0xdest");

    server.status.mark_processing("0xfailed").await;
    server.status.mark_failed("0xfailed", "Failed after 5 attempts: boom").await;
    let body = server.get_json("/status/0xfailed").await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"], "Failed after 5 attempts: boom");
    assert!(body.get("destTxHash").is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_retry_queue_listing() {
    let server = TestServer::start().await;

    let body = server.get_json("/retry-queue").await;
    assert_eq!(body["count"], 0);
    assert_eq!(body["items"], Value::Array(vec![]));

    let event = locked_event(0xcd);
    server
        .retry_queue
        .enqueue(FailedOperation::from_event(&event, "nonce too low"))
        .await;

    let response = server.get("/retry-queue").await;
    assert_no_cache(&response);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 1);
    let item = &body["items"][0];
    assert_eq!(item["type"], "mint");
    assert_eq!(item["sourceTxHash"], event.status_key());
    assert_eq!(item["amount"], "1000000000000000000");
    assert_eq!(item["nonce"], "7");
    assert_eq!(item["attempts"], 1);
    assert_eq!(item["lastError"], "nonce too low");
    assert!(item["createdAt"].is_i64());

    server.stop().await;
}

#[tokio::test]
async fn test_metrics_and_not_found() {
    let server = TestServer::start().await;

    let response = server.get("/metrics").await;
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("relayer_"));

    let response = server.get("/nope").await;
    assert_eq!(response.status(), 404);
    assert_no_cache(&response);

    server.stop().await;
}

#[tokio::test]
async fn test_bind_fails_when_port_is_taken() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let err = api::bind(&addr).await.unwrap_err();
    assert!(err.to_string().contains("Failed to bind query API"));

    let listener = api::bind("127.0.0.1:0").await.unwrap();
    assert_ne!(listener.local_addr().unwrap().port(), 0);
}
