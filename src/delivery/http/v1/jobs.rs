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
use crate::domain::user::Role;
use crate::usecase::error::UsecaseError;

#[derive(Debug, Deserialize)]
pub struct CompletedJobsParams {
    pub limit: Option<i64>,
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_completed_jobs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<CompletedJobsParams>,
) -> Result<impl IntoResponse, UsecaseError> {
    require_role(&user, &[Role::Mechanic])?;

    let jobs = state
        .completed_jobs_usecase
        .list_for_worker(user.user_id, params.limit)
        .await?;

    Ok((StatusCode::OK, Json(jobs)))
}
