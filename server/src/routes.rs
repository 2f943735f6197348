use axum::{middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::{history, presence};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Authenticated routes (JWT required, Claims extractor validates token)
    let message_routes = Router::new()
        .route(
            "/api/messages/conversations",
            axum::routing::get(history::list_conversations),
        )
        .route(
            "/api/messages/history",
            axum::routing::get(history::get_history),
        )
        .route(
            "/api/messages/read/{user_id}",
            axum::routing::post(history::mark_read),
        )
        .route("/api/presence", axum::routing::get(presence::get_presence));

    // WebSocket endpoint (token via query param or Authorization header)
    let ws_routes = Router::new().route(
        "/ws",
        axum::routing::get(ws_handler::ws_upgrade),
    );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(message_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
