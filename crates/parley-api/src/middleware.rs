use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{DecodingKey, Validation, decode};

use parley_types::api::Claims;

use crate::auth::{AppState, SESSION_COOKIE, user_projection};
use crate::error::ApiError;

/// Decode and validate a session token. Returns None on any failure —
/// callers only need to know the credential is unusable.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Extract the session cookie, validate it, and resolve the user before
/// dispatch. Downstream handlers receive the public projection as an
/// extension — the password hash never leaves this layer.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let jar = CookieJar::from_headers(req.headers());

    let token = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(ApiError::Unauthorized("Unauthorized - No Token Provided"))?;

    let claims = verify_token(&state.jwt_secret, &token)
        .ok_or(ApiError::Unauthorized("Unauthorized - Invalid Token"))?;

    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::Unauthorized("Unauthorized - Unknown User"))?;

    req.extensions_mut().insert(user_projection(&user));
    Ok(next.run(req).await)
}
