//! REST endpoints for conversation lists, history and read acknowledgements.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::error::ChatError;
use crate::state::AppState;
use crate::store::{run_blocking, Conversation, Message};
use crate::UserId;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "userId")]
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

fn into_response_error(err: ChatError) -> (StatusCode, String) {
    (err.status_code(), err.to_string())
}

/// GET /api/messages/conversations
/// One entry per correspondent of the caller, most recent first. JWT auth required.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ConversationsResponse>, (StatusCode, String)> {
    let user = claims.user_id;
    let conversations = run_blocking(state.chat.store(), move |store| store.conversations(user))
        .await
        .map_err(|e| {
            tracing::warn!(user_id = user, error = %e, "Failed to list conversations");
            into_response_error(e.into())
        })?;

    Ok(Json(ConversationsResponse { conversations }))
}

/// GET /api/messages/history?userId=N
/// Both directions between the caller and `userId`, oldest first. JWT auth required.
pub async fn get_history(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    let user = claims.user_id;
    let other = query.user_id;
    if user == other {
        return Err(into_response_error(ChatError::validation(
            "history requires another user",
        )));
    }

    let messages = run_blocking(state.chat.store(), move |store| store.history(user, other))
        .await
        .map_err(|e| {
            tracing::warn!(user_id = user, other = other, error = %e, "Failed to load history");
            into_response_error(e.into())
        })?;

    Ok(Json(HistoryResponse { messages }))
}

/// POST /api/messages/read/{user_id}
/// Same effect as a `read` event on the real-time channel. JWT auth required.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(from): Path<UserId>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .chat
        .mark_read(claims.user_id, from)
        .await
        .map_err(into_response_error)?;
    Ok(StatusCode::NO_CONTENT)
}
