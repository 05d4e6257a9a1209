use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// API error taxonomy. Every variant renders as `{"message": …}` so clients
/// get a uniform body shape; internals are logged server-side only.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Validation or conflict failure with a caller-facing message
    #[error("{0}")]
    BadRequest(String),

    /// Missing/invalid session credential
    #[error("{0}")]
    Unauthorized(&'static str),

    /// Missing resource
    #[error("{0}")]
    NotFound(&'static str),

    /// Image-host failure during profile update — the one upstream failure
    /// with a specific caller-facing message
    #[error("{0}")]
    UploadFailed(&'static str),

    /// Everything else: logged with detail, surfaced generically
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.to_string()),
            ApiError::UploadFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.to_string()),
            ApiError::Internal(err) => {
                error!("Internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({ "message": message }));

        (status, body).into_response()
    }
}

/// Type alias for handler results
pub type ApiResult<T> = Result<T, ApiError>;
