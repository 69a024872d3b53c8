//! End-to-end tests against a real listener with a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use tally_auth::{JwtVerifier, issue_token};
use tally_core::{Expense, ExpenseEvent};
use tally_server::config::ServerConfig;
use tally_server::server::TallyServer;

const SECRET: &str = "integration-secret";
const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    server: Arc<TallyServer>,
    addr: SocketAddr,
    http: reqwest::Client,
}

impl TestServer {
    async fn boot() -> Self {
        let verifier = Arc::new(JwtVerifier::new(SECRET));
        let server = Arc::new(TallyServer::new(ServerConfig::default(), verifier));
        let (addr, _handle) = server.listen().await.unwrap();
        Self {
            server,
            addr,
            http: reqwest::Client::new(),
        }
    }

    fn stream_url(&self) -> String {
        format!("ws://{}/api/stream/expenses", self.addr)
    }

    fn api_url(&self, path: &str) -> String {
        format!("http://{}/api/expenses{path}", self.addr)
    }

    async fn wait_for_connections(&self, expected: usize) {
        let result = timeout(TIMEOUT, async {
            while self.server.hub().connection_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "expected {expected} connections, have {}",
            self.server.hub().connection_count()
        );
    }

    async fn subscribe(&self, owner: &str) -> WsStream {
        let (mut ws, _) = connect_async(self.stream_url()).await.unwrap();
        assert_eq!(next_text(&mut ws).await.as_deref(), Some("Waiting for AuthToken"));
        let token = token_for(owner);
        ws.send(Message::text(json!({ "token": token }).to_string()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut ws).await.as_deref(), Some("Connected"));
        ws
    }

    async fn create(&self, owner: &str, body: Value) -> reqwest::Response {
        self.http
            .post(self.api_url(""))
            .bearer_auth(token_for(owner))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

fn token_for(owner: &str) -> String {
    issue_token(SECRET, owner, Some(chrono::Duration::hours(1))).unwrap()
}

/// Next text frame, skipping control frames. `None` once the peer closes.
async fn next_text(ws: &mut WsStream) -> Option<String> {
    let read = async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(other) => panic!("unexpected frame: {other:?}"),
            }
        }
        None
    };
    timeout(TIMEOUT, read).await.expect("timed out waiting for frame")
}

/// Assert that no text frame arrives within [`QUIET`].
async fn assert_quiet(ws: &mut WsStream) {
    let result = timeout(QUIET, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => return other,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

fn parse_expense(frame: &str) -> Expense {
    serde_json::from_str(frame).unwrap()
}

// ── Scenario A: owner-scoped delivery ──

#[tokio::test]
async fn create_is_pushed_only_to_owner() {
    let t = TestServer::boot().await;
    let mut u1 = t.subscribe("u1").await;
    let mut u2 = t.subscribe("u2").await;
    t.wait_for_connections(2).await;

    let resp = t
        .create("u1", json!({"title": "lunch", "price": 12.5, "icon": "food"}))
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let created: Expense = resp.json().await.unwrap();

    let pushed = parse_expense(&next_text(&mut u1).await.unwrap());
    assert_eq!(pushed, created);
    assert_eq!(pushed.user_id, "u1");
    assert_quiet(&mut u2).await;
}

// ── Scenario B: every device of an owner ──

#[tokio::test]
async fn every_connection_of_owner_receives() {
    let t = TestServer::boot().await;
    let mut phone = t.subscribe("u1").await;
    let mut laptop = t.subscribe("u1").await;
    t.wait_for_connections(2).await;

    let _ = t.create("u1", json!({"title": "rent", "price": 900.0})).await;

    let a = parse_expense(&next_text(&mut phone).await.unwrap());
    let b = parse_expense(&next_text(&mut laptop).await.unwrap());
    assert_eq!(a.title, "rent");
    assert_eq!(a, b);
}

// ── Scenario C: bad credentials never register ──

#[tokio::test]
async fn garbage_credential_is_closed_without_registration() {
    let t = TestServer::boot().await;
    let mut u1 = t.subscribe("u1").await;
    t.wait_for_connections(1).await;

    let (mut ws, _) = connect_async(t.stream_url()).await.unwrap();
    assert_eq!(next_text(&mut ws).await.as_deref(), Some("Waiting for AuthToken"));

    ws.send(Message::text(json!({"token": "garbage"}).to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut ws).await, None, "closed with no further text");
    assert_eq!(t.server.hub().connection_count(), 1);

    let _ = t.create("u1", json!({"title": "still here"})).await;
    assert_eq!(parse_expense(&next_text(&mut u1).await.unwrap()).title, "still here");
}

#[tokio::test]
async fn forged_and_expired_tokens_are_rejected() {
    let t = TestServer::boot().await;

    let forged = issue_token("wrong-secret", "u1", None).unwrap();
    let expired = issue_token(SECRET, "u1", Some(chrono::Duration::hours(-1))).unwrap();
    for token in [forged, expired] {
        let (mut ws, _) = connect_async(t.stream_url()).await.unwrap();
        assert_eq!(next_text(&mut ws).await.as_deref(), Some("Waiting for AuthToken"));
        ws.send(Message::text(json!({ "token": token }).to_string()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut ws).await, None);
    }
    assert_eq!(t.server.hub().connection_count(), 0);
}

// ── Scenario D: disconnect cleanup ──

#[tokio::test]
async fn client_close_removes_connection() {
    let t = TestServer::boot().await;
    let mut u1 = t.subscribe("u1").await;
    let mut other = t.subscribe("u1").await;
    t.wait_for_connections(2).await;

    u1.close(None).await.unwrap();
    t.wait_for_connections(1).await;

    let _ = t.create("u1", json!({"title": "after"})).await;
    let pushed = parse_expense(&next_text(&mut other).await.unwrap());
    assert_eq!(pushed.title, "after");
}

#[tokio::test]
async fn dropped_socket_removes_connection() {
    let t = TestServer::boot().await;
    let u1 = t.subscribe("u1").await;
    t.wait_for_connections(1).await;

    drop(u1);
    t.wait_for_connections(0).await;
}

// ── Mutation semantics ──

#[tokio::test]
async fn update_is_pushed_and_delete_is_not() {
    let t = TestServer::boot().await;
    let mut u1 = t.subscribe("u1").await;
    t.wait_for_connections(1).await;

    let created: Expense = t
        .create("u1", json!({"title": "draft", "price": 1.0}))
        .await
        .json()
        .await
        .unwrap();
    let _ = next_text(&mut u1).await.unwrap();

    let resp = t
        .http
        .put(t.api_url(""))
        .bearer_auth(token_for("u1"))
        .json(&json!({"id": created.id, "title": "final", "price": 2.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let pushed = parse_expense(&next_text(&mut u1).await.unwrap());
    assert_eq!(pushed.id, created.id);
    assert_eq!(pushed.title, "final");

    let resp = t
        .http
        .delete(t.api_url(&format!("/{}", created.id)))
        .bearer_auth(token_for("u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_quiet(&mut u1).await;
}

#[tokio::test]
async fn direct_publish_preserves_order() {
    let t = TestServer::boot().await;
    let mut u1 = t.subscribe("u1").await;
    t.wait_for_connections(1).await;

    let publisher = t.server.publisher();
    for n in 0..100 {
        let expense = Expense {
            id: n.to_string(),
            user_id: "u1".into(),
            ..Expense::default()
        };
        assert!(publisher.publish(ExpenseEvent::from(expense)));
    }
    for n in 0..100 {
        let pushed = parse_expense(&next_text(&mut u1).await.unwrap());
        assert_eq!(pushed.id, n.to_string());
    }
}

#[tokio::test]
async fn api_requires_token() {
    let t = TestServer::boot().await;
    let resp = t.http.get(t.api_url("")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Missing auth token");
}

#[tokio::test]
async fn health_reports_connections() {
    let t = TestServer::boot().await;
    let _u1 = t.subscribe("u1").await;
    t.wait_for_connections(1).await;

    let body: Value = t
        .http
        .get(format!("http://{}/health", t.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn stop_closes_streams() {
    let t = TestServer::boot().await;
    let mut u1 = t.subscribe("u1").await;
    t.wait_for_connections(1).await;

    assert!(t.server.stop(Vec::new()).await);
    assert_eq!(next_text(&mut u1).await, None);
    assert_eq!(t.server.hub().connection_count(), 0);
}
