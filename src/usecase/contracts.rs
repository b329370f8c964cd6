use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::completed_job::CompletedJob;
use crate::domain::message::Message;
use crate::domain::notification::Notification;
use crate::domain::request::{RequestStatus, ServiceRequest};
use crate::domain::user::{Role, User};
use crate::repository::errors::RepositoryError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub total: i64,
    pub pending: i64,
    pub completed: i64,
}

/// Every mutating call is conditional on the state the caller last observed.
/// `Ok(None)` means the guard did not match and nothing was written.
#[cfg_attr(test, mockall::automock)]
pub trait RequestRepository: Send + Sync {
    async fn create(&self, request: &ServiceRequest) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ServiceRequest>, RepositoryError>;
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<ServiceRequest>, RepositoryError>;
    async fn find_pending(&self) -> Result<Vec<ServiceRequest>, RepositoryError>;
    /// Every request, newest first.
    async fn find_all(&self) -> Result<Vec<ServiceRequest>, RepositoryError>;
    async fn accept_pending(
        &self,
        id: Uuid,
        worker_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ServiceRequest>, RepositoryError>;
    async fn advance_status(
        &self,
        id: Uuid,
        worker_id: Uuid,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ServiceRequest>, RepositoryError>;
    /// Moves `started -> completed` and archives `job` in one transaction.
    async fn complete(
        &self,
        id: Uuid,
        worker_id: Uuid,
        job: &CompletedJob,
    ) -> Result<Option<ServiceRequest>, RepositoryError>;
    async fn cancel(
        &self,
        id: Uuid,
        from: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ServiceRequest>, RepositoryError>;
    async fn counts(&self) -> Result<RequestCounts, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &Message) -> Result<(), RepositoryError>;
    async fn find_by_request_id(&self, request_id: Uuid) -> Result<Vec<Message>, RepositoryError>;
    async fn mark_read(&self, request_id: Uuid, reader_id: Uuid) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<(), RepositoryError>;
    async fn find_by_user_id(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, RepositoryError>;
    async fn count_unread(&self, user_id: Uuid) -> Result<i64, RepositoryError>;
    async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<(), RepositoryError>;
    async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait CompletedJobRepository: Send + Sync {
    async fn find_by_worker_id(&self, worker_id: Uuid, limit: i64) -> Result<Vec<CompletedJob>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;
    async fn find_by_role(&self, role: Role) -> Result<Vec<User>, RepositoryError>;
    async fn count_by_role(&self, role: Role) -> Result<i64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait ReverseGeocoder: Send + Sync {
    /// Best-effort lookup; `None` when the provider fails or knows nothing.
    async fn reverse(&self, lat: f64, lng: f64) -> Option<String>;
}
