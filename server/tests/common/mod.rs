//! Shared harness: an in-process server on a random port backed by a temp dir.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_server::config::WsConfig;
use chat_server::store::{SharedStore, SqliteMessageStore};
use chat_server::UserId;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub jwt_secret: Vec<u8>,
}

impl TestServer {
    pub fn token(&self, user_id: UserId) -> String {
        chat_server::auth::jwt::issue_access_token(
            &self.jwt_secret,
            user_id,
            &format!("user{user_id}"),
            3600,
        )
        .expect("Failed to issue token")
    }

    pub fn ws_url(&self, user_id: UserId) -> String {
        format!("ws://{}/ws?token={}", self.addr, self.token(user_id))
    }

    /// Connect as `user_id` and consume the initial unread snapshot.
    pub async fn connect(&self, user_id: UserId) -> (WsWrite, WsRead, Value) {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.ws_url(user_id))
            .await
            .expect("Failed to connect to WebSocket");
        let (write, mut read) = ws_stream.split();
        let counts = next_event(&mut read).await;
        assert_eq!(counts["type"], "unread_counts", "first frame must be unread counts");
        (write, read, counts)
    }
}

/// Start the server on a random port with default keepalive timings.
pub async fn start_test_server() -> TestServer {
    start_test_server_with(WsConfig::default()).await
}

pub async fn start_test_server_with(ws: WsConfig) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = chat_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = chat_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");
    let store: SharedStore = Arc::new(SqliteMessageStore::new(db));

    let state = chat_server::state::AppState::new(jwt_secret.clone(), store, ws);
    let app = chat_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        jwt_secret,
    }
}

/// Next JSON text frame, skipping control frames. Panics after 2s.
pub async fn next_event(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected an event within timeout");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).expect("Event is not JSON");
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text frame, got: {:?}", other),
        }
    }
}

/// Skip events until one of the given type arrives.
pub async fn next_event_of_type(read: &mut WsRead, kind: &str) -> Value {
    loop {
        let event = next_event(read).await;
        if event["type"] == kind {
            return event;
        }
    }
}

/// Assert nothing but presence updates arrive within `window`.
pub async fn assert_no_message(read: &mut WsRead, window: Duration) {
    loop {
        match tokio::time::timeout(window, read.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let event: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(event["type"], "presence", "Unexpected event: {event}");
            }
            Ok(Some(Ok(Message::Ping(_)))) => continue,
            Ok(other) => panic!("Unexpected frame: {:?}", other),
        }
    }
}

pub fn user_ids(event: &Value) -> Vec<UserId> {
    event["userIds"]
        .as_array()
        .expect("presence event carries userIds")
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect()
}
