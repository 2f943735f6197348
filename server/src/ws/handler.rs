use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Browsers cannot set headers on upgrade, so the token may ride in ?token=.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. The credential is checked before upgrading:
/// a missing or invalid token is answered with 401 and no registry mutation.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.or_else(|| bearer_token(&headers));

    let claims = match token {
        Some(token) => jwt::validate_access_token(&state.jwt_secret, &token)
            .map_err(|e| ChatError::Auth(jwt::describe_error(&e).to_string())),
        None => Err(ChatError::Auth("missing token".to_string())),
    };

    match claims {
        Ok(claims) => {
            let user_id = claims.user_id;
            tracing::info!(user_id = user_id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        Err(err) => {
            tracing::warn!(error = %err, "WebSocket auth failed");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}
