use std::sync::Arc;

use anyhow::{Context, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{UserRow, parse_timestamp};
use parley_gateway::dispatcher::Dispatcher;
use parley_types::api::{
    AckResponse, Claims, LoginRequest, SignupRequest, UpdateProfileRequest, UserResponse,
    VerifyOtpRequest,
};

use crate::error::{ApiError, ApiResult};
use crate::images::{self, ImageHost};
use crate::mailer::Mailer;
use crate::otp::{OtpRecord, OtpStore};
use crate::validation;

/// Session lifetime for the signed cookie and its embedded expiry.
pub const SESSION_TTL_DAYS: i64 = 7;

/// Name of the HTTP-only session cookie.
pub const SESSION_COOKIE: &str = "jwt";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub otp_store: Arc<dyn OtpStore>,
    pub mailer: Arc<dyn Mailer>,
    pub images: ImageHost,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub stream_secret: String,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    if !validation::is_valid_email(&req.email) {
        return Err(ApiError::BadRequest("Invalid email format".into()));
    }
    if req.full_name.trim().is_empty() {
        return Err(ApiError::BadRequest("Full name is required".into()));
    }
    if req.password.len() < 6 {
        return Err(ApiError::BadRequest(
            "Password must be at least 6 characters".into(),
        ));
    }

    // Any account, verified or not, owns its email; the unverified case is
    // recovered through the login resend flow, not a second signup.
    if state.db.get_user_by_email(&req.email)?.is_some() {
        return Err(ApiError::BadRequest("User already exists".into()));
    }

    let password_hash = hash_password(&req.password)?;
    let record = OtpRecord::new(req.full_name, req.email, password_hash, Utc::now());

    state.otp_store.upsert(record.clone())?;
    state.mailer.send_otp(&record.email, &record.code);

    Ok((
        StatusCode::CREATED,
        Json(AckResponse {
            message: "OTP sent to your email. Please verify to complete registration.".into(),
        }),
    ))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<VerifyOtpRequest>,
) -> ApiResult<impl IntoResponse> {
    let Some(pending) = state.otp_store.get(&req.email)? else {
        return Err(ApiError::BadRequest(
            "No pending registration found for this email.".into(),
        ));
    };

    // Guard the race where a concurrent verification already promoted this
    // email: the pending record is stale, drop it.
    let existing = state.db.get_user_by_email(&req.email)?;
    if let Some(user) = &existing {
        if user.is_verified {
            state.otp_store.delete(&req.email)?;
            return Err(ApiError::BadRequest(
                "User already exists. Please login.".into(),
            ));
        }
    }

    if !pending.accepts(&req.otp, Utc::now()) {
        return Err(ApiError::BadRequest(
            "Invalid or expired OTP! Sign up again.".into(),
        ));
    }

    let user = match existing {
        // Re-verification (email change, unverified login): the account
        // already exists, flip the flag and keep its id and history.
        Some(user) => {
            state.db.mark_verified(&user.id)?;
            state
                .db
                .get_user_by_id(&user.id)?
                .context("user disappeared during verification")?
        }
        None => {
            let user_id = Uuid::new_v4().to_string();
            state.db.create_user(
                &user_id,
                &pending.full_name,
                &pending.email,
                &pending.password_hash,
                true,
            )?;
            state
                .db
                .get_user_by_id(&user_id)?
                .context("user disappeared after creation")?
        }
    };

    state.otp_store.delete(&req.email)?;

    let token = create_token(&state.jwt_secret, &user.id)?;

    Ok((
        jar.add(session_cookie(token)),
        Json(user_projection(&user)),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    // One generic failure for unknown email and wrong password alike, so the
    // endpoint can't be used to enumerate accounts.
    let Some(user) = state.db.get_user_by_email(&req.email)? else {
        return Err(ApiError::BadRequest("Invalid email or password".into()));
    };
    if !verify_password(&user.password, &req.password) {
        return Err(ApiError::BadRequest("Invalid email or password".into()));
    }

    if !user.is_verified {
        // Correct password but unproven email: rotate the code and fail the
        // login. The fresh record supersedes whatever was pending.
        let record = OtpRecord::new(
            user.full_name.clone(),
            user.email.clone(),
            user.password.clone(),
            Utc::now(),
        );
        state.otp_store.upsert(record.clone())?;
        state.mailer.send_otp(&user.email, &record.code);

        return Err(ApiError::BadRequest(
            "Your account is not verified. A new OTP has been sent to your email.".into(),
        ));
    }

    let token = create_token(&state.jwt_secret, &user.id)?;

    Ok((
        jar.add(session_cookie(token)),
        Json(user_projection(&user)),
    ))
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.add(clear_session_cookie()),
        Json(AckResponse {
            message: "Logged out successfully".into(),
        }),
    )
}

pub async fn check_auth(Extension(user): Extension<UserResponse>) -> impl IntoResponse {
    Json(user)
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<UserResponse>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let UpdateProfileRequest {
        full_name,
        email,
        profile_pic,
    } = req;

    if full_name.is_none() && email.is_none() && profile_pic.is_none() {
        return Err(ApiError::BadRequest("Nothing to update.".into()));
    }

    let user_id = user.id.to_string();

    if let Some(pic) = profile_pic {
        if !images::is_image_data_url(&pic) {
            return Err(ApiError::BadRequest(
                "Invalid image format. Please upload a valid image.".into(),
            ));
        }

        match state.images.upload(&pic).await {
            Ok(url) => state.db.update_profile_pic(&user_id, &url)?,
            Err(e) => {
                error!("Profile picture upload failed: {:#}", e);
                return Err(ApiError::UploadFailed(
                    "Failed to update profile. Please try again later.",
                ));
            }
        }
    }

    if let Some(name) = full_name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::BadRequest("Full name cannot be empty.".into()));
        }
        state.db.update_full_name(&user_id, name)?;
    }

    if let Some(new_email) = email {
        if new_email != user.email {
            if !validation::is_valid_email(&new_email) {
                return Err(ApiError::BadRequest("Invalid email format".into()));
            }
            if state.db.get_user_by_email(&new_email)?.is_some() {
                return Err(ApiError::BadRequest("Email already in use.".into()));
            }

            // Adopting a new address drops verified status; the account must
            // prove control of it through the same OTP cycle as signup.
            state.db.update_email_unverified(&user_id, &new_email)?;

            let row = state
                .db
                .get_user_by_id(&user_id)?
                .context("user disappeared during email change")?;
            let record = OtpRecord::new(row.full_name, new_email, row.password, Utc::now());
            state.otp_store.upsert(record.clone())?;
            state.mailer.send_otp(&record.email, &record.code);
        }
    }

    let row = state
        .db
        .get_user_by_id(&user_id)?
        .context("user disappeared during profile update")?;

    Ok(Json(user_projection(&row)))
}

// -- Helpers shared across handlers and middleware --

pub fn user_projection(row: &UserRow) -> UserResponse {
    UserResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt user id '{}': {}", row.id, e);
            Uuid::default()
        }),
        full_name: row.full_name.clone(),
        email: row.email.clone(),
        profile_pic: row.profile_pic.clone(),
        is_verified: row.is_verified,
        created_at: parse_timestamp(&row.created_at),
    }
}

pub fn create_token(secret: &str, user_id: &str) -> anyhow::Result<String> {
    let sub: Uuid = user_id
        .parse()
        .map_err(|e| anyhow!("Corrupt user id '{}': {}", user_id, e))?;

    let claims = Claims {
        sub,
        exp: (Utc::now() + chrono::Duration::days(SESSION_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::days(SESSION_TTL_DAYS))
        .build()
}

fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(hash)
}

fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("pw123456").unwrap();
        assert_ne!(hash, "pw123456");
        assert!(verify_password(&hash, "pw123456"));
        assert!(!verify_password(&hash, "pw123457"));
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("not-a-phc-string", "pw123456"));
    }
}
