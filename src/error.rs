//! Error types for the webhook.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Error type for admission handling and server startup
#[derive(Error, Debug)]
pub enum Error {
    /// Request body is not a parseable admission review
    #[error("unmarshaling request failed with {0}")]
    Decode(#[source] serde_json::Error),

    /// Admission review parsed but carries no request
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// Embedded object is missing or is not a Pod
    #[error("decoding object failed with {0}")]
    ObjectDecode(String),

    /// Response envelope could not be serialized
    #[error("marshaling response failed with {0}")]
    Encode(#[source] serde_json::Error),

    /// Patch could not be attached to the admission response
    #[error("patch serialization error: {0}")]
    Patch(String),

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Result type alias for webhook operations
pub type Result<T> = std::result::Result<T, Error>;
