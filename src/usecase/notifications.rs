use std::sync::Arc;

use uuid::Uuid;

use crate::domain::notification::{Notification, NotificationType};
use crate::usecase::contracts::NotificationRepository;
use crate::usecase::error::UsecaseError;
use crate::usecase::feed::{Feeds, Subscription};

/// How many of the newest notifications a live feed snapshot carries.
pub const FEED_LIMIT: i64 = 50;

pub struct NotificationsUseCase<N>
where
    N: NotificationRepository,
{
    notification_repository: N,
    feeds: Arc<Feeds>,
}

impl<N> NotificationsUseCase<N>
where
    N: NotificationRepository,
{
    pub fn new(notification_repository: N, feeds: Arc<Feeds>) -> Self {
        Self {
            notification_repository,
            feeds,
        }
    }

    #[tracing::instrument(skip(self, title, body, data), fields(%user_id, %notification_type))]
    pub async fn notify(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        title: String,
        body: String,
        data: serde_json::Value,
    ) -> Result<Notification, UsecaseError> {
        tracing::debug!("creating notification");

        let notification = Notification::new(user_id, notification_type, title, body, data);
        self.notification_repository.create(&notification).await?;

        metrics::counter!("notifications_created_total", "type" => notification_type.as_str()).increment(1);
        tracing::info!(notification_id = %notification.id, user_id = %user_id, "notification created");

        self.refresh(user_id).await;
        Ok(notification)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id, %limit, %offset))]
    pub async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, UsecaseError> {
        tracing::debug!("listing notifications");

        let notifications = self
            .notification_repository
            .find_by_user_id(user_id, limit, offset)
            .await?;

        tracing::debug!(user_id = %user_id, count = notifications.len(), "retrieved notifications");
        Ok(notifications)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn count_unread(&self, user_id: Uuid) -> Result<i64, UsecaseError> {
        tracing::debug!("counting unread notifications");

        let count = self.notification_repository.count_unread(user_id).await?;

        tracing::debug!(user_id = %user_id, count, "unread count retrieved");
        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(notification_id = %id, user_id = %user_id))]
    pub async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<(), UsecaseError> {
        tracing::debug!("marking notification as read");

        self.notification_repository
            .mark_as_read(id, user_id)
            .await
            .map_err(|e| match UsecaseError::from(e) {
                UsecaseError::NotFound(_) => UsecaseError::NotFound("Notification".to_string()),
                other => other,
            })?;

        tracing::debug!(notification_id = %id, "notification marked as read");
        self.refresh(user_id).await;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64, UsecaseError> {
        tracing::debug!("marking all notifications as read");

        let updated = self.notification_repository.mark_all_as_read(user_id).await?;

        tracing::debug!(user_id = %user_id, updated, "all notifications marked as read");
        if updated > 0 {
            self.refresh(user_id).await;
        }
        Ok(updated)
    }

    pub async fn subscribe(&self, user_id: Uuid) -> Result<Subscription<Notification>, UsecaseError> {
        let subscription = self
            .feeds
            .notifications
            .subscribe(user_id, || {
                self.notification_repository
                    .find_by_user_id(user_id, FEED_LIMIT, 0)
            })
            .await?;
        Ok(subscription)
    }

    async fn refresh(&self, user_id: Uuid) {
        self.feeds
            .notifications
            .refresh(&user_id, || {
                self.notification_repository
                    .find_by_user_id(user_id, FEED_LIMIT, 0)
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::repository::errors::RepositoryError;
    use crate::usecase::contracts::MockNotificationRepository;
    use serde_json::json;

    /// A mock backed by a shared vector so reads observe earlier writes.
    fn stateful_repo(store: Arc<Mutex<Vec<Notification>>>) -> MockNotificationRepository {
        let mut repo = MockNotificationRepository::new();
        {
            let store = store.clone();
            repo.expect_create().returning(move |n| {
                store.lock().unwrap().insert(0, n.clone());
                Ok(())
            });
        }
        {
            let store = store.clone();
            repo.expect_find_by_user_id().returning(move |user_id, limit, offset| {
                Ok(store
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|n| n.user_id == user_id)
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect())
            });
        }
        {
            let store = store.clone();
            repo.expect_count_unread().returning(move |user_id| {
                Ok(store
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|n| n.user_id == user_id && !n.read)
                    .count() as i64)
            });
        }
        {
            let store = store.clone();
            repo.expect_mark_all_as_read().returning(move |user_id| {
                let mut store = store.lock().unwrap();
                let mut updated = 0;
                for n in store.iter_mut().filter(|n| n.user_id == user_id && !n.read) {
                    n.read = true;
                    updated += 1;
                }
                Ok(updated)
            });
        }
        repo
    }

    fn usecase(repo: MockNotificationRepository) -> NotificationsUseCase<MockNotificationRepository> {
        NotificationsUseCase::new(repo, Arc::new(Feeds::new(8)))
    }

    #[tokio::test]
    async fn test_mark_all_as_read_clears_unread_count() {
        let store = Arc::new(Mutex::new(Vec::new()));
        let usecase = usecase(stateful_repo(store.clone()));
        let user_id = Uuid::new_v4();
        let other_user = Uuid::new_v4();

        for i in 0..3 {
            usecase
                .notify(user_id, NotificationType::RequestUpdate, format!("update {i}"), "body".to_string(), json!({}))
                .await
                .unwrap();
        }
        usecase
            .notify(other_user, NotificationType::System, "hello".to_string(), "body".to_string(), json!({}))
            .await
            .unwrap();
        assert_eq!(usecase.count_unread(user_id).await.unwrap(), 3);

        let updated = usecase.mark_all_as_read(user_id).await.unwrap();

        assert_eq!(updated, 3);
        assert_eq!(usecase.count_unread(user_id).await.unwrap(), 0);
        assert_eq!(usecase.count_unread(other_user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_feed_is_newest_first_and_follows_reads() {
        let store = Arc::new(Mutex::new(Vec::new()));
        let usecase = usecase(stateful_repo(store));
        let user_id = Uuid::new_v4();

        let mut feed = usecase.subscribe(user_id).await.unwrap();
        assert!(feed.recv().await.unwrap().is_empty());

        usecase
            .notify(user_id, NotificationType::Assignment, "first".to_string(), String::new(), json!({}))
            .await
            .unwrap();
        assert_eq!(feed.recv().await.unwrap().len(), 1);

        usecase
            .notify(user_id, NotificationType::RequestUpdate, "second".to_string(), String::new(), json!({}))
            .await
            .unwrap();
        let snapshot = feed.recv().await.unwrap();
        let titles: Vec<&str> = snapshot.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);

        usecase.mark_all_as_read(user_id).await.unwrap();
        let snapshot = feed.recv().await.unwrap();
        assert!(snapshot.iter().all(|n| n.read));
    }

    #[tokio::test]
    async fn test_mark_as_read_missing_notification() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_mark_as_read()
            .times(1)
            .returning(|_, _| Err(RepositoryError::NotFound));

        let result = usecase(repo).mark_as_read(Uuid::new_v4(), Uuid::new_v4()).await;

        match result {
            Err(UsecaseError::NotFound(what)) => assert_eq!(what, "Notification"),
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notify_propagates_store_failure() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_create()
            .returning(|_| Err(RepositoryError::DatabaseError("connection reset".to_string())));
        repo.expect_find_by_user_id().times(0);

        let result = usecase(repo)
            .notify(Uuid::new_v4(), NotificationType::System, "t".to_string(), "b".to_string(), json!({}))
            .await;

        assert!(matches!(result, Err(UsecaseError::Unavailable(_))));
    }
}
