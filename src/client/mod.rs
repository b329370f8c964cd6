//! Typed HTTP client for the worker flow and an optimistic job tracker built on it.

pub mod api;
pub mod tracker;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::request::{RequestStatus, ServiceRequest, TransitionError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("rejected locally: {0}")]
    Rejected(#[from] TransitionError),
}

/// The server operations a [`tracker::JobTracker`] needs.
#[cfg_attr(test, mockall::automock)]
pub trait JobGateway: Send + Sync {
    async fn fetch(&self, id: Uuid) -> Result<ServiceRequest, ClientError>;
    async fn accept(&self, id: Uuid) -> Result<ServiceRequest, ClientError>;
    async fn advance(&self, id: Uuid, to: RequestStatus) -> Result<ServiceRequest, ClientError>;
}
