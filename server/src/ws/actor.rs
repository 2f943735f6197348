use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::presence::broadcast_presence;
use crate::chat::MessageRouter;
use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::protocol::{self, DecodeError, OutboundEvent};
use crate::ws::registry::ConnectionHandle;
use crate::UserId;

/// Per-connection lifecycle.
///
/// `Connecting` ends in the upgrade handler: a bad credential never gets a
/// session. `Authenticated` is transient inside [`Session::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Pre-upgrade credential check in `ws::handler`. No `Session` is ever
    /// built in this state.
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// One authenticated connection and the state machine driving it.
pub struct Session {
    user_id: UserId,
    conn: ConnectionHandle,
    chat: MessageRouter,
    state: ConnectionState,
}

impl Session {
    /// Authenticated -> Active: register, hydrate unread counts, send them to
    /// this connection only, then announce presence to everyone.
    pub async fn open(chat: MessageRouter, user_id: UserId, conn: ConnectionHandle) -> Self {
        let mut session = Self {
            user_id,
            conn,
            chat,
            state: ConnectionState::Authenticated,
        };

        if let Some(previous) = session.chat.registry().register(user_id, session.conn.clone()) {
            tracing::info!(
                user_id = user_id,
                previous = %previous.id(),
                current = %session.conn.id(),
                "Connection replaced an older one"
            );
        }

        match session.chat.hydrate(user_id).await {
            Ok(counts) => {
                send_event(&session.conn, &OutboundEvent::UnreadCounts { counts });
            }
            Err(e) => {
                // Cached counts still go out first, followed by the failure
                tracing::warn!(user_id = user_id, error = %e, "Unread hydration failed");
                let counts = session.chat.unread().snapshot(user_id);
                send_event(&session.conn, &OutboundEvent::UnreadCounts { counts });
                send_event(&session.conn, &OutboundEvent::from_error(&e));
            }
        }

        broadcast_presence(session.chat.registry());

        session.state = ConnectionState::Active;
        session
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    /// Process one text frame to completion. Malformed frames are dropped.
    pub async fn handle_text(&mut self, text: &str) {
        if self.state != ConnectionState::Active {
            return;
        }
        match protocol::decode(text) {
            Ok(event) => self.chat.handle_event(self.user_id, &self.conn, event).await,
            Err(DecodeError::Invalid(err)) => {
                send_event(&self.conn, &OutboundEvent::from_error(&err));
            }
            Err(DecodeError::Malformed(reason)) => {
                tracing::debug!(user_id = self.user_id, reason = %reason, "Dropped malformed frame");
            }
        }
    }

    /// Any state -> Closed. Deregisters this exact connection and re-announces
    /// presence. Returns false if the session was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;

        let removed = self
            .chat
            .registry()
            .deregister_connection(self.user_id, self.conn.id());
        broadcast_presence(self.chat.registry());

        tracing::debug!(
            user_id = self.user_id,
            connection = %self.conn.id(),
            removed = removed,
            "Session closed"
        );
        true
    }
}

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: handles inbound frames one at a time, in arrival order
///
/// The mpsc sender is what the registry stores, so any part of the system can
/// push to this client by looking it up.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let conn = ConnectionHandle::new(tx.clone());

    // Spawn the writer first so the initial unread snapshot is flushed promptly
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let mut session = Session::open(state.chat.clone(), user_id, conn).await;

    tracing::info!(
        user_id = user_id,
        connection = %session.connection().id(),
        "WebSocket session active"
    );

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_interval = Duration::from_secs(state.ws.ping_interval_secs);
    let pong_timeout = Duration::from_secs(state.ws.pong_timeout_secs);
    let ping_tx = tx.clone();
    let mut ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Active: the only suspension point is waiting for the next frame
    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = &mut ping_handle => {
                // Keepalive gave up: pong timeout or writer gone
                tracing::info!(user_id = user_id, "Keepalive ended, dropping connection");
                break;
            }
        };

        match frame {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    session.handle_text(text.as_str()).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = user_id,
                        bytes = data.len(),
                        "Dropped binary frame (expected JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(user_id = user_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id = user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id = user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    writer_handle.abort();

    session.close();

    tracing::info!(user_id = user_id, "WebSocket session closed");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;
    use crate::store::{
        Conversation, Message as StoredMessage, MessageStore, SqliteMessageStore, StorageError,
        UnreadCounts,
    };
    use std::sync::Arc;

    fn chat() -> MessageRouter {
        let db = init_memory_db().expect("in-memory db");
        MessageRouter::new(Arc::new(SqliteMessageStore::new(db)))
    }

    fn channel() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            events.push(serde_json::from_str(text.as_str()).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_offline_message_then_connect_then_read() {
        let chat = chat();
        let (alice_conn, _alice_rx) = channel();
        let mut alice = Session::open(chat.clone(), 1, alice_conn).await;

        alice.handle_text(r#"{"type":"message","to":2,"message":"hi"}"#).await;
        assert_eq!(chat.unread().snapshot(2), UnreadCounts::from([(1, 1)]));

        let (bob_conn, mut bob_rx) = channel();
        let mut bob = Session::open(chat.clone(), 2, bob_conn).await;
        assert_eq!(bob.state(), ConnectionState::Active);

        let events = drain(&mut bob_rx);
        assert_eq!(
            events,
            vec![
                OutboundEvent::UnreadCounts {
                    counts: UnreadCounts::from([(1, 1)])
                },
                OutboundEvent::Presence {
                    user_ids: vec![1, 2]
                },
            ]
        );

        bob.handle_text(r#"{"type":"read","from":1}"#).await;
        assert_eq!(chat.unread().snapshot(2), UnreadCounts::from([(1, 0)]));
        assert_eq!(
            drain(&mut bob_rx),
            vec![OutboundEvent::UnreadCounts {
                counts: UnreadCounts::from([(1, 0)])
            }]
        );

        let stored = chat.store().history(1, 2).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].read_at.is_some());
    }

    #[tokio::test]
    async fn test_hydration_from_store_after_restart() {
        let chat = chat();
        chat.store().append(1, 2, "while you were away").unwrap();

        let (conn, mut rx) = channel();
        Session::open(chat.clone(), 2, conn).await;

        assert_eq!(
            drain(&mut rx).first(),
            Some(&OutboundEvent::UnreadCounts {
                counts: UnreadCounts::from([(1, 1)])
            })
        );
    }

    struct UnreadQueryFails(SqliteMessageStore);

    impl MessageStore for UnreadQueryFails {
        fn append(&self, from: UserId, to: UserId, body: &str) -> Result<StoredMessage, StorageError> {
            self.0.append(from, to, body)
        }
        fn history(&self, a: UserId, b: UserId) -> Result<Vec<StoredMessage>, StorageError> {
            self.0.history(a, b)
        }
        fn mark_read(&self, reader: UserId, from: UserId) -> Result<usize, StorageError> {
            self.0.mark_read(reader, from)
        }
        fn unread_counts(&self, _: UserId) -> Result<UnreadCounts, StorageError> {
            Err(StorageError::LockPoisoned)
        }
        fn conversations(&self, user: UserId) -> Result<Vec<Conversation>, StorageError> {
            self.0.conversations(user)
        }
    }

    #[tokio::test]
    async fn test_hydration_failure_is_reported_after_cached_counts() {
        let db = init_memory_db().expect("in-memory db");
        let chat = MessageRouter::new(Arc::new(UnreadQueryFails(SqliteMessageStore::new(db))));
        chat.unread().increment(1, 7);

        let (conn, mut rx) = channel();
        let session = Session::open(chat.clone(), 1, conn).await;
        assert_eq!(session.state(), ConnectionState::Active);

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            OutboundEvent::UnreadCounts {
                counts: UnreadCounts::from([(7, 1)])
            }
        );
        assert!(matches!(&events[1], OutboundEvent::Error { code, .. } if code == "storage"));
        assert_eq!(
            events[2],
            OutboundEvent::Presence {
                user_ids: vec![1]
            }
        );
    }

    #[tokio::test]
    async fn test_close_is_reentrant() {
        let chat = chat();
        let (conn, _rx) = channel();
        let mut session = Session::open(chat.clone(), 1, conn).await;

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(chat.registry().is_empty());

        // Closed sessions ignore further frames
        session.handle_text(r#"{"type":"message","to":2,"message":"late"}"#).await;
        assert!(chat.store().history(1, 2).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_broadcasts_post_removal_presence() {
        let chat = chat();
        let (watch_conn, mut watch_rx) = channel();
        let _watcher = Session::open(chat.clone(), 10, watch_conn).await;
        let (conn, _rx) = channel();
        let mut leaving = Session::open(chat.clone(), 11, conn).await;
        drain(&mut watch_rx);

        leaving.close();
        assert_eq!(
            drain(&mut watch_rx),
            vec![OutboundEvent::Presence {
                user_ids: vec![10]
            }]
        );
    }

    #[tokio::test]
    async fn test_replaced_session_close_keeps_new_connection() {
        let chat = chat();
        let (old_conn, _old_rx) = channel();
        let mut old = Session::open(chat.clone(), 1, old_conn).await;
        let (new_conn, _new_rx) = channel();
        let new = Session::open(chat.clone(), 1, new_conn).await;

        old.close();
        assert_eq!(
            chat.registry().lookup(1).map(|c| c.id()),
            Some(new.connection().id())
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_end_session() {
        let chat = chat();
        let (conn, mut rx) = channel();
        let mut session = Session::open(chat.clone(), 1, conn).await;
        drain(&mut rx);

        session.handle_text("{{{ not json").await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(session.state(), ConnectionState::Active);

        session.handle_text(r#"{"type":"message","to":2,"message":"still here"}"#).await;
        assert_eq!(chat.store().history(1, 2).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_event_reports_validation_error() {
        let chat = chat();
        let (conn, mut rx) = channel();
        let mut session = Session::open(chat.clone(), 1, conn).await;
        drain(&mut rx);

        session.handle_text(r#"{"type":"message","to":2,"message":""}"#).await;
        let events = drain(&mut rx);
        assert!(matches!(&events[..], [OutboundEvent::Error { code, .. }] if code == "validation"));
    }
}
