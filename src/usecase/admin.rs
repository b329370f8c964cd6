use serde::Serialize;

use crate::domain::request::ServiceRequest;
use crate::domain::user::{Role, User};
use crate::usecase::contracts::{RequestRepository, UserRepository};
use crate::usecase::error::UsecaseError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analytics {
    pub total_users: i64,
    pub total_workers: i64,
    pub total_requests: i64,
    pub pending_requests: i64,
    pub completed_requests: i64,
}

pub struct AdminUseCase<U, R>
where
    U: UserRepository,
    R: RequestRepository,
{
    user_repository: U,
    request_repository: R,
}

impl<U, R> AdminUseCase<U, R>
where
    U: UserRepository,
    R: RequestRepository,
{
    pub fn new(user_repository: U, request_repository: R) -> Self {
        Self {
            user_repository,
            request_repository,
        }
    }

    #[tracing::instrument(skip(self), fields(%role))]
    pub async fn users_by_role(&self, role: Role) -> Result<Vec<User>, UsecaseError> {
        let users = self.user_repository.find_by_role(role).await?;

        tracing::debug!(count = users.len(), "retrieved users by role");
        Ok(users)
    }

    #[tracing::instrument(skip(self))]
    pub async fn all_requests(&self) -> Result<Vec<ServiceRequest>, UsecaseError> {
        let mut requests = self.request_repository.find_all().await?;
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        tracing::debug!(count = requests.len(), "retrieved all requests");
        Ok(requests)
    }

    #[tracing::instrument(skip(self))]
    pub async fn analytics(&self) -> Result<Analytics, UsecaseError> {
        tracing::debug!("collecting analytics");

        let total_users = self.user_repository.count_by_role(Role::User).await?;
        let total_workers = self.user_repository.count_by_role(Role::Mechanic).await?;
        let counts = self.request_repository.counts().await?;

        Ok(Analytics {
            total_users,
            total_workers,
            total_requests: counts.total,
            pending_requests: counts.pending,
            completed_requests: counts.completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::contracts::{MockRequestRepository, MockUserRepository, RequestCounts};
    use crate::domain::request::{RequestStatus, sample_request};
    use chrono::{Duration, Utc};
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_all_requests_newest_first_across_statuses() {
        let mut older = sample_request(RequestStatus::Completed, Some(uuid::Uuid::new_v4()));
        older.created_at = Utc::now() - Duration::hours(3);
        let newer = sample_request(RequestStatus::Pending, None);
        let (older_id, newer_id) = (older.id, newer.id);

        let mut users = MockUserRepository::new();
        users.expect_find_by_role().times(0);
        let mut requests = MockRequestRepository::new();
        requests
            .expect_find_all()
            .times(1)
            .returning(move || Ok(vec![older.clone(), newer.clone()]));

        let all = AdminUseCase::new(users, requests).all_requests().await.unwrap();

        let ids: Vec<_> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer_id, older_id]);
    }

    #[tokio::test]
    async fn test_analytics_combines_counts() {
        let mut users = MockUserRepository::new();
        users.expect_count_by_role().with(eq(Role::User)).returning(|_| Ok(42));
        users.expect_count_by_role().with(eq(Role::Mechanic)).returning(|_| Ok(7));
        let mut requests = MockRequestRepository::new();
        requests.expect_counts().returning(|| {
            Ok(RequestCounts {
                total: 120,
                pending: 5,
                completed: 98,
            })
        });

        let analytics = AdminUseCase::new(users, requests).analytics().await.unwrap();

        assert_eq!(
            analytics,
            Analytics {
                total_users: 42,
                total_workers: 7,
                total_requests: 120,
                pending_requests: 5,
                completed_requests: 98,
            }
        );
    }
}
