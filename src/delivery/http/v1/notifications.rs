use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::delivery::http::v1::middleware::AuthenticatedUser;
use crate::domain::notification::Notification;
use crate::usecase::error::UsecaseError;

#[derive(Debug, Deserialize)]
pub struct NotificationListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct NotificationsListResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Serialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<NotificationListParams>,
) -> Result<impl IntoResponse, UsecaseError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);
    tracing::debug!(limit, offset, "listing notifications");

    let notifications = state
        .notifications_usecase
        .list_notifications(user.user_id, limit, offset)
        .await?;
    let unread_count = state.notifications_usecase.count_unread(user.user_id).await?;

    tracing::debug!(count = notifications.len(), unread_count, "notifications listed");
    Ok((
        StatusCode::OK,
        Json(NotificationsListResponse {
            notifications,
            unread_count,
        }),
    ))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    let unread_count = state.notifications_usecase.count_unread(user.user_id).await?;

    Ok((StatusCode::OK, Json(UnreadCountResponse { unread_count })))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, notification_id = %id))]
pub async fn mark_as_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, UsecaseError> {
    state.notifications_usecase.mark_as_read(id, user.user_id).await?;

    tracing::debug!(notification_id = %id, "notification marked as read");
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn mark_all_as_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    let updated = state.notifications_usecase.mark_all_as_read(user.user_id).await?;

    tracing::debug!(updated, "all notifications marked as read");
    Ok((StatusCode::OK, Json(MarkAllReadResponse { updated })))
}
