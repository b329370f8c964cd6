use axum::{Json, response::IntoResponse};

use crate::domain::display::label_table;

#[tracing::instrument]
pub async fn get_labels() -> impl IntoResponse {
    Json(label_table())
}
