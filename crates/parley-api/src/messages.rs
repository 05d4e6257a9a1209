use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{error, warn};
use uuid::Uuid;

use parley_db::models::{MessageRow, parse_timestamp};
use parley_types::api::{
    DeleteMessageResponse, MessageResponse, SendMessageRequest, UserResponse,
};
use parley_types::events::GatewayEvent;

use crate::auth::{AppState, user_projection};
use crate::error::{ApiError, ApiResult};
use crate::images;

/// Everyone except the caller, for the chat sidebar.
pub async fn get_sidebar_users(
    State(state): State<AppState>,
    Extension(user): Extension<UserResponse>,
) -> ApiResult<impl IntoResponse> {
    let db = state.clone();
    let uid = user.id.to_string();

    let rows = tokio::task::spawn_blocking(move || db.db.list_users_except(&uid))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let users: Vec<UserResponse> = rows.iter().map(user_projection).collect();
    Ok(Json(users))
}

/// Full history between the caller and the peer in the path, both
/// directions, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(user): Extension<UserResponse>,
) -> ApiResult<impl IntoResponse> {
    let db = state.clone();
    let me = user.id.to_string();
    let peer = peer_id.to_string();

    let rows = tokio::task::spawn_blocking(move || db.db.get_messages_between(&me, &peer))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let messages: Vec<MessageResponse> = rows.iter().map(message_projection).collect();
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(user): Extension<UserResponse>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    if state.db.get_user_by_id(&receiver_id.to_string())?.is_none() {
        return Err(ApiError::NotFound("User not found"));
    }

    let image_url = match &req.image {
        Some(data) => {
            if !images::is_image_data_url(data) {
                return Err(ApiError::BadRequest(
                    "Invalid image format. Please upload a valid image.".into(),
                ));
            }
            let url = state.images.upload(data).await.map_err(|e| {
                error!("Message image upload failed: {:#}", e);
                anyhow!("image upload failed")
            })?;
            Some(url)
        }
        None => None,
    };

    let message_id = Uuid::new_v4();

    // Run blocking DB insert off the async runtime
    let db = state.clone();
    let mid = message_id.to_string();
    let sid = user.id.to_string();
    let rid = receiver_id.to_string();
    let text = req.text.clone();
    let image = image_url.clone();
    tokio::task::spawn_blocking(move || {
        db.db
            .insert_message(&mid, &sid, &rid, text.as_deref(), image.as_deref())
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let message = MessageResponse {
        id: message_id,
        sender_id: user.id,
        receiver_id,
        text: req.text,
        image: image_url,
        created_at: Utc::now(),
    };

    // Forward to the recipient's live connection, if any. Fire-and-forget:
    // the response does not depend on delivery.
    state
        .dispatcher
        .send_to_user(
            receiver_id,
            GatewayEvent::NewMessage {
                message: message.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(_user): Extension<UserResponse>,
) -> ApiResult<impl IntoResponse> {
    let db = state.clone();
    let mid = message_id.to_string();

    let deleted = tokio::task::spawn_blocking(move || db.db.delete_message(&mid))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let Some(row) = deleted else {
        return Err(ApiError::NotFound("Message not found"));
    };

    Ok(Json(DeleteMessageResponse {
        message: "Message deleted".into(),
        deleted_message: message_projection(&row),
    }))
}

fn message_projection(row: &MessageRow) -> MessageResponse {
    MessageResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt message id '{}': {}", row.id, e);
            Uuid::default()
        }),
        sender_id: row.sender_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt sender_id on message '{}': {}", row.id, e);
            Uuid::default()
        }),
        receiver_id: row.receiver_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt receiver_id on message '{}': {}", row.id, e);
            Uuid::default()
        }),
        text: row.text.clone(),
        image: row.image.clone(),
        created_at: parse_timestamp(&row.created_at),
    }
}
