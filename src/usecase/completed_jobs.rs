use uuid::Uuid;

use crate::domain::completed_job::CompletedJob;
use crate::usecase::contracts::CompletedJobRepository;
use crate::usecase::error::UsecaseError;

pub const DEFAULT_HISTORY_LIMIT: i64 = 10;
pub const MAX_HISTORY_LIMIT: i64 = 100;

pub struct CompletedJobsUseCase<C: CompletedJobRepository> {
    completed_job_repository: C,
}

impl<C: CompletedJobRepository> CompletedJobsUseCase<C> {
    pub fn new(completed_job_repository: C) -> Self {
        Self { completed_job_repository }
    }

    /// A worker's archive, newest completion first.
    #[tracing::instrument(skip(self), fields(worker_id = %worker_id, ?limit))]
    pub async fn list_for_worker(
        &self,
        worker_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<CompletedJob>, UsecaseError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        tracing::debug!(limit, "listing completed jobs");

        let jobs = self
            .completed_job_repository
            .find_by_worker_id(worker_id, limit)
            .await?;

        tracing::debug!(count = jobs.len(), "retrieved completed jobs");
        Ok(jobs)
    }
}
