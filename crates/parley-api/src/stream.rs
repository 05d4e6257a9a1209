use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;

use parley_types::api::{StreamTokenRequest, StreamTokenResponse};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// Claims understood by the external video/voice service.
#[derive(Debug, Serialize)]
struct StreamClaims {
    user_id: String,
    iat: usize,
    exp: usize,
}

/// Mint an opaque token for the video/voice integration. No session check:
/// the endpoint trusts its caller and only validates the payload.
pub async fn generate_stream_token(
    State(state): State<AppState>,
    Json(req): Json<StreamTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("User ID is required.".into()));
    }

    let now = Utc::now();
    let claims = StreamClaims {
        user_id: req.user_id,
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::hours(24)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.stream_secret.as_bytes()),
    )
    .map_err(anyhow::Error::from)?;

    Ok(Json(StreamTokenResponse { token }))
}
