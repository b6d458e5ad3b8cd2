use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use peerdrop_shared::types::PeerId;

use crate::presence::ConnectionHandle;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::PeerNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Registry misuse. Unknown handles are not errors; see `PresenceRegistry`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection {0} is still active and must enter its grace period before expiry")]
    ExpireWhileActive(ConnectionHandle),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MailboxError {
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}
