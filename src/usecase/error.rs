use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::domain::request::TransitionError;
use crate::repository::errors::RepositoryError;

#[derive(Debug, Error)]
pub enum UsecaseError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl From<RepositoryError> for UsecaseError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => UsecaseError::NotFound("Resource".to_string()),
            RepositoryError::DatabaseError(msg) => UsecaseError::Unavailable(msg),
        }
    }
}

impl From<TransitionError> for UsecaseError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotAssigned | TransitionError::NotParticipant => {
                UsecaseError::Forbidden(e.to_string())
            }
            TransitionError::Terminal(_)
            | TransitionError::AlreadyClaimed(_)
            | TransitionError::Invalid { .. } => UsecaseError::Conflict(e.to_string()),
        }
    }
}

impl IntoResponse for UsecaseError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            UsecaseError::NotFound(_) => StatusCode::NOT_FOUND,
            UsecaseError::Forbidden(_) => StatusCode::FORBIDDEN,
            UsecaseError::Validation(_) => StatusCode::BAD_REQUEST,
            UsecaseError::Conflict(_) => StatusCode::CONFLICT,
            UsecaseError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            UsecaseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            UsecaseError::Internal(_) | UsecaseError::Unavailable(_) => {
                tracing::error!(error = %self, "request failed");
            }
            UsecaseError::NotFound(_) => {
                tracing::warn!(error = %self, "resource not found");
            }
            UsecaseError::Forbidden(_) => {
                tracing::warn!(error = %self, "forbidden");
            }
            UsecaseError::Conflict(_) => {
                tracing::info!(error = %self, "conflict");
            }
            _ => {
                tracing::debug!(error = %self);
            }
        }

        (status, self.to_string()).into_response()
    }
}
