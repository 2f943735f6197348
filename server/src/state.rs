use crate::chat::MessageRouter;
use crate::config::WsConfig;
use crate::store::SharedStore;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// HS256 key used to verify access tokens
    pub jwt_secret: Vec<u8>,
    /// Connection registry, unread cache and message store
    pub chat: MessageRouter,
    /// Keepalive timings for real-time connections
    pub ws: WsConfig,
}

impl AppState {
    pub fn new(jwt_secret: Vec<u8>, store: SharedStore, ws: WsConfig) -> Self {
        Self {
            jwt_secret,
            chat: MessageRouter::new(store),
            ws,
        }
    }
}
