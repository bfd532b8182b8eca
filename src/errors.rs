//! Request-level error types.
//!
//! Every variant maps to an HTTP status and a JSON failure payload.  The
//! enum implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(AssetError::InvalidVersion { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::sink::SinkError;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Failure kinds surfaced by the resolution layer.
#[derive(Debug, Error)]
pub enum AssetError {
    /// A path segment is empty, not allow-listed, or carries traversal.
    #[error("invalid identifier for :{field}: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    /// A required route parameter or form field is absent or empty.
    #[error(":{0} is a required parameter and must be a non-empty string")]
    MissingParameter(&'static str),

    /// The supplied version is not a semantic version.
    #[error("invalid semver value: {0:?}")]
    InvalidVersion(String),

    /// A submitted form did not describe a complete domain object.
    #[error("{0}")]
    InvalidEntry(String),

    /// The body exceeded a byte or part ceiling.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// The body was not a parseable multipart form.
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    /// The body stream failed before it completed (e.g. client disconnect).
    #[error("request body aborted: {0}")]
    Aborted(String),

    /// Nothing is stored under the requested reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent write precondition failed.
    #[error("conflicting concurrent update to {0}")]
    Conflict(String),

    /// The storage backend failed.
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(#[source] anyhow::Error),
}

impl AssetError {
    /// Short machine-readable code, used for logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            AssetError::InvalidIdentifier { .. } => "InvalidIdentifier",
            AssetError::MissingParameter(_) => "MissingParameter",
            AssetError::InvalidVersion(_) => "InvalidVersion",
            AssetError::InvalidEntry(_) => "InvalidEntry",
            AssetError::PayloadTooLarge(_) => "PayloadTooLarge",
            AssetError::MalformedBody(_) => "MalformedBody",
            AssetError::Aborted(_) => "Aborted",
            AssetError::NotFound(_) => "NotFound",
            AssetError::Conflict(_) => "Conflict",
            AssetError::BackendUnavailable(_) => "BackendUnavailable",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AssetError::InvalidIdentifier { .. }
            | AssetError::MissingParameter(_)
            | AssetError::InvalidVersion(_)
            | AssetError::InvalidEntry(_)
            | AssetError::MalformedBody(_)
            | AssetError::Aborted(_) => StatusCode::BAD_REQUEST,
            AssetError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AssetError::NotFound(_) => StatusCode::NOT_FOUND,
            AssetError::Conflict(_) => StatusCode::CONFLICT,
            AssetError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<SinkError> for AssetError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::NotFound { key } => AssetError::NotFound(key),
            SinkError::Unavailable(source) => AssetError::BackendUnavailable(source),
        }
    }
}

impl IntoResponse for AssetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = ?self, "request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
