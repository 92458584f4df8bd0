use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use cumulus_crypto::CryptoError;
use cumulus_events::EventHubError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Object not found: {0}")]
    ObjectNotFound(Uuid),

    #[error("Object too large: {size} bytes (max {max})")]
    ObjectTooLarge { size: usize, max: usize },

    #[error("Object storage error: {0}")]
    ObjectStorage(String),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Event hub error: {0}")]
    EventHub(#[from] EventHubError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::ObjectNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::ObjectTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::ObjectStorage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Object storage error".to_string(),
            ),
            ServerError::Crypto(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Encryption error".to_string(),
            ),
            ServerError::EventHub(EventHubError::Closed) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::EventHub(EventHubError::MissingUser) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
