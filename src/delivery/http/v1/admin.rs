use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::delivery::http::v1::middleware::{AuthenticatedUser, require_role};
use crate::delivery::http::v1::requests::RequestResponse;
use crate::domain::user::Role;
use crate::usecase::error::UsecaseError;

#[derive(Debug, Deserialize)]
pub struct UsersByRoleParams {
    pub role: Role,
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, role = %params.role))]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<UsersByRoleParams>,
) -> Result<impl IntoResponse, UsecaseError> {
    require_role(&user, &[Role::Admin])?;

    let users = state.admin_usecase.users_by_role(params.role).await?;

    tracing::debug!(count = users.len(), "users listed");
    Ok((StatusCode::OK, Json(users)))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    require_role(&user, &[Role::Admin])?;

    let requests = state.admin_usecase.all_requests().await?;
    let response: Vec<RequestResponse> = requests.into_iter().map(RequestResponse::from).collect();

    tracing::debug!(count = response.len(), "requests listed");
    Ok((StatusCode::OK, Json(response)))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    require_role(&user, &[Role::Admin])?;

    let analytics = state.admin_usecase.analytics().await?;

    Ok((StatusCode::OK, Json(analytics)))
}
