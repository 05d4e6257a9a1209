use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_api::auth::{AppState, AppStateInner, SESSION_COOKIE};
use parley_api::images::ImageHost;
use parley_api::mailer::{HttpMailer, LogMailer, Mailer};
use parley_api::middleware::verify_token;
use parley_api::otp::{DbOtpStore, MemoryOtpStore, OtpStore};
use parley_api::routes::api_router;
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;

/// Interval between sweeps of expired pending registrations.
const OTP_PURGE_INTERVAL_SECS: u64 = 60;

/// Request bodies carry base64 data URLs for profile pictures and
/// message images.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let stream_secret =
        std::env::var("PARLEY_STREAM_SECRET").unwrap_or_else(|_| "dev-stream-secret".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let cors_origin =
        std::env::var("PARLEY_CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".into());

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // OTP ledger strategy: persisted by default. The in-memory variant loses
    // pending registrations on restart and must not be used with more than
    // one server instance.
    let otp_store: Arc<dyn OtpStore> =
        match std::env::var("PARLEY_OTP_STORE").unwrap_or_else(|_| "db".into()).as_str() {
            "memory" => {
                warn!("Using in-memory OTP store: pending registrations are lost on restart");
                Arc::new(MemoryOtpStore::new())
            }
            _ => Arc::new(DbOtpStore::new(db.clone())),
        };

    let mailer: Arc<dyn Mailer> = match std::env::var("PARLEY_MAIL_ENDPOINT") {
        Ok(endpoint) => Arc::new(HttpMailer::new(
            endpoint,
            std::env::var("PARLEY_MAIL_API_KEY").unwrap_or_default(),
            std::env::var("PARLEY_MAIL_FROM")
                .unwrap_or_else(|_| "Parley <no-reply@parley.chat>".into()),
        )),
        Err(_) => {
            warn!("PARLEY_MAIL_ENDPOINT not set, OTP codes will be logged instead of emailed");
            Arc::new(LogMailer)
        }
    };

    let images = ImageHost::new(
        std::env::var("PARLEY_IMAGE_UPLOAD_URL")
            .unwrap_or_else(|_| "http://localhost:9000/upload".into()),
        std::env::var("PARLEY_IMAGE_API_KEY").unwrap_or_default(),
    );

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        otp_store: otp_store.clone(),
        mailer,
        images,
        dispatcher,
        jwt_secret,
        stream_secret,
    });

    // Sweep expired pending registrations in the background
    tokio::spawn(run_otp_purge_loop(otp_store, OTP_PURGE_INTERVAL_SECS));

    // Routes
    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state.clone());

    // Cookies require an explicit origin; a wildcard would break credentials
    let cors = CorsLayer::new()
        .allow_origin(cors_origin.parse::<axum::http::HeaderValue>()?)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let app = Router::new()
        .merge(api_router(state))
        .merge(ws_route)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_otp_purge_loop(store: Arc<dyn OtpStore>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match store.purge_expired(Utc::now()) {
            Ok(count) if count > 0 => info!("Purged {} expired pending registrations", count),
            Ok(_) => {}
            Err(e) => warn!("OTP purge error: {}", e),
        }
    }
}

/// The gateway authenticates at upgrade time with the same session cookie
/// the REST middleware validates.
async fn ws_upgrade(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_token(&state.jwt_secret, &token).ok_or(StatusCode::UNAUTHORIZED)?;

    let known_user = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some();
    if !known_user {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, claims.sub)))
}
