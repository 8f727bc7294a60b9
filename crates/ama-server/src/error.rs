//! Server and request error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use ama_store::StoreError;

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-visible request failures. Bodies are short plain-text reasons.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid room id")]
    InvalidRoomId,

    #[error("invalid message id")]
    InvalidMessageId,

    #[error("invalid body")]
    InvalidBody,

    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("room is full")]
    RoomFull,

    #[error("something went wrong")]
    Internal(#[source] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRoomId | Self::InvalidMessageId | Self::InvalidBody | Self::RoomNotFound => {
                StatusCode::BAD_REQUEST
            }
            Self::MessageNotFound => StatusCode::NOT_FOUND,
            Self::RoomFull => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a room lookup failure.
    pub fn from_room_lookup(err: StoreError) -> Self {
        if err.is_not_found() {
            Self::RoomNotFound
        } else {
            Self::Internal(err)
        }
    }

    /// Map a message lookup or update failure.
    pub fn from_message_lookup(err: StoreError) -> Self {
        if err.is_not_found() {
            Self::MessageNotFound
        } else {
            Self::Internal(err)
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref source) = self {
            error!(error = %source, "store operation failed");
        }
        (self.status(), self.to_string()).into_response()
    }
}
