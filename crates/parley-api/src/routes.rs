use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};

use crate::auth::{self, AppState};
use crate::messages;
use crate::middleware::require_auth;
use crate::stream;

/// Assemble the HTTP API. Kept out of the binary so integration tests can
/// drive the exact router the server runs.
pub fn api_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/verify-otp", post(auth::verify_otp))
        .route("/api/auth/login", post(auth::login))
        .route("/api/stream/token", post(stream::generate_stream_token))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/check", get(auth::check_auth))
        .route("/api/auth/update-profile", put(auth::update_profile))
        .route("/api/messages/users", get(messages::get_sidebar_users))
        .route("/api/messages/send/{id}", post(messages::send_message))
        .route(
            "/api/messages/{id}",
            get(messages::get_messages).delete(messages::delete_message),
        )
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
