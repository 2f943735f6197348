//! Error taxonomy for the messaging core.
//!
//! Each variant is handled at the boundary closest to where it occurs:
//! validation and storage failures are reported to the initiating connection,
//! transport failures close that connection only, auth failures refuse the
//! upgrade before any registry mutation.

use crate::store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Self-send, empty body, missing recipient and similar client mistakes.
    #[error("{0}")]
    Validation(String),

    /// The durable store rejected a read or write.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Read or write failure on a single connection.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Missing, malformed or expired credential.
    #[error("unauthorized: {0}")]
    Auth(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable code carried in the outbound `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::Transport(_) => "transport",
            Self::Auth(_) => "unauthorized",
        }
    }

    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Storage(_) | Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
