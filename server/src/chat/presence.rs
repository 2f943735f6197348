//! Presence broadcast.
//!
//! The online set is never stored separately: it is the registry's key set,
//! read after each mutation and pushed in full to every connection so a
//! client that misses one update corrects itself on the next.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::OutboundEvent;
use crate::ws::ConnectionRegistry;
use crate::UserId;

/// Push the given online set to every registered connection.
pub fn announce(registry: &ConnectionRegistry, online_user_ids: &[UserId]) {
    let event = OutboundEvent::Presence {
        user_ids: online_user_ids.to_vec(),
    };
    broadcast_to_all(registry, &event);
}

/// Snapshot the registry and announce it. Call after every register or
/// deregister so the broadcast reflects the post-mutation state.
pub fn broadcast_presence(registry: &ConnectionRegistry) -> Vec<UserId> {
    let online = registry.snapshot();
    tracing::debug!(online = ?online, "Broadcasting presence");
    announce(registry, &online);
    online
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    #[serde(rename = "userIds")]
    pub user_ids: Vec<UserId>,
}

/// GET /api/presence -- Users currently connected to this server. JWT auth required.
pub async fn get_presence(State(state): State<AppState>, _claims: Claims) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        user_ids: state.chat.registry().snapshot(),
    })
}
