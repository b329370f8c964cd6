use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::delivery::http::v1::middleware::AuthenticatedUser;
use crate::usecase::error::UsecaseError;
use crate::usecase::messages::MAX_MESSAGE_LEN;

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageBody {
    #[validate(length(min = 1, max = MAX_MESSAGE_LEN))]
    pub body: String,
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, %request_id))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, UsecaseError> {
    let messages = state
        .messages_usecase
        .list_messages(user.user_id, user.role, request_id)
        .await?;

    tracing::debug!(count = messages.len(), "messages listed");
    Ok((StatusCode::OK, Json(messages)))
}

#[tracing::instrument(skip(state, payload), fields(user_id = %user.user_id, %request_id))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<SendMessageBody>,
) -> Result<impl IntoResponse, UsecaseError> {
    if let Err(validation_errors) = payload.validate() {
        tracing::warn!(user_id = %user.user_id, ?validation_errors, "validation failed");
        return Err(UsecaseError::Validation(format!("{validation_errors}")));
    }

    let message = state
        .messages_usecase
        .send_message(user.user_id, &user.email, request_id, payload.body)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, %request_id))]
pub async fn mark_messages_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, UsecaseError> {
    let updated = state
        .messages_usecase
        .mark_read(user.user_id, request_id)
        .await?;

    Ok((StatusCode::OK, Json(MarkReadResponse { updated })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_body_validation() {
        assert!(SendMessageBody { body: "on my way".to_string() }.validate().is_ok());
        assert!(SendMessageBody { body: String::new() }.validate().is_err());
        let limit = MAX_MESSAGE_LEN as usize;
        assert!(SendMessageBody { body: "x".repeat(limit) }.validate().is_ok());
        assert!(SendMessageBody { body: "x".repeat(limit + 1) }.validate().is_err());
    }
}
