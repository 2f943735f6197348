use axum::extract::ws::{CloseFrame, Message};

use super::protocol::OutboundEvent;
use super::registry::{ConnectionHandle, ConnectionRegistry};
use crate::UserId;

/// Push an event to one connection. Best effort: returns false if the
/// connection's writer is gone, never errors.
pub fn send_event(conn: &ConnectionHandle, event: &OutboundEvent) -> bool {
    match event.to_ws_message() {
        Some(msg) => conn.send(msg),
        None => false,
    }
}

/// Broadcast an event to every registered connection.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &OutboundEvent) {
    let Some(msg) = event.to_ws_message() else {
        return;
    };
    for conn in registry.connections() {
        let _ = conn.send(msg.clone());
    }
}

/// Send an event to a specific user if they are connected here.
/// Returns whether a live connection accepted the frame.
pub fn send_to_user(registry: &ConnectionRegistry, user_id: UserId, event: &OutboundEvent) -> bool {
    registry
        .lookup(user_id)
        .map(|conn| send_event(&conn, event))
        .unwrap_or(false)
}

/// Ask every registered connection to close (server shutdown).
/// Each connection's own read loop performs the deregistration.
pub fn close_all(registry: &ConnectionRegistry, close_code: u16, reason: &str) -> usize {
    let close_frame = CloseFrame {
        code: close_code,
        reason: reason.into(),
    };
    let connections = registry.connections();
    for conn in &connections {
        let _ = conn.send(Message::Close(Some(close_frame.clone())));
    }
    connections.len()
}
