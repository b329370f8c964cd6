use std::sync::Arc;

use uuid::Uuid;

use crate::domain::message::Message;
use crate::domain::request::ServiceRequest;
use crate::domain::user::Role;
use crate::repository::errors::RepositoryError;
use crate::usecase::contracts::{MessageRepository, RequestRepository, UserRepository};
use crate::usecase::error::UsecaseError;
use crate::usecase::feed::{Feeds, Subscription};

pub const MAX_MESSAGE_LEN: u64 = 2000;

pub struct MessagesUseCase<M, R, U>
where
    M: MessageRepository,
    R: RequestRepository,
    U: UserRepository,
{
    message_repository: M,
    request_repository: R,
    user_repository: U,
    feeds: Arc<Feeds>,
}

impl<M, R, U> MessagesUseCase<M, R, U>
where
    M: MessageRepository,
    R: RequestRepository,
    U: UserRepository,
{
    pub fn new(message_repository: M, request_repository: R, user_repository: U, feeds: Arc<Feeds>) -> Self {
        Self {
            message_repository,
            request_repository,
            user_repository,
            feeds,
        }
    }

    /// Appends a chat message. `fallback_name` is used when the sender has no profile name.
    #[tracing::instrument(skip(self, fallback_name, body), fields(sender_id = %sender_id, request_id = %request_id))]
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        fallback_name: &str,
        request_id: Uuid,
        body: String,
    ) -> Result<Message, UsecaseError> {
        tracing::debug!("sending message");

        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(UsecaseError::Validation("Message cannot be empty".to_string()));
        }
        if body.chars().count() as u64 > MAX_MESSAGE_LEN {
            return Err(UsecaseError::Validation(format!(
                "Message cannot exceed {MAX_MESSAGE_LEN} characters"
            )));
        }

        let request = self.participant_request(sender_id, Role::User, request_id).await?;
        if request.status.is_terminal() {
            return Err(UsecaseError::Conflict(format!(
                "Chat is closed for {} requests",
                request.status
            )));
        }

        let sender_name = match self.user_repository.find_by_id(sender_id).await {
            Ok(Some(user)) if !user.name.trim().is_empty() => user.name,
            Ok(_) => fallback_name.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load sender profile");
                fallback_name.to_string()
            }
        };

        let message = Message::new(
            request_id,
            sender_id,
            sender_name,
            request.counterparty(sender_id),
            body,
        );
        self.message_repository.create(&message).await?;

        metrics::counter!("messages_sent_total").increment(1);
        tracing::info!(message_id = %message.id, "message sent");

        self.refresh(request_id).await;
        Ok(message)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id, request_id = %request_id))]
    pub async fn list_messages(
        &self,
        user_id: Uuid,
        role: Role,
        request_id: Uuid,
    ) -> Result<Vec<Message>, UsecaseError> {
        self.participant_request(user_id, role, request_id).await?;

        let messages = self.load_ordered(request_id).await?;

        tracing::debug!(count = messages.len(), "retrieved messages");
        Ok(messages)
    }

    /// Marks every message addressed to `reader_id` on this request as read.
    #[tracing::instrument(skip(self), fields(reader_id = %reader_id, request_id = %request_id))]
    pub async fn mark_read(&self, reader_id: Uuid, request_id: Uuid) -> Result<u64, UsecaseError> {
        self.participant_request(reader_id, Role::User, request_id).await?;

        let updated = self.message_repository.mark_read(request_id, reader_id).await?;

        tracing::debug!(updated, "messages marked as read");
        if updated > 0 {
            self.refresh(request_id).await;
        }
        Ok(updated)
    }

    pub async fn subscribe(
        &self,
        user_id: Uuid,
        role: Role,
        request_id: Uuid,
    ) -> Result<Subscription<Message>, UsecaseError> {
        self.participant_request(user_id, role, request_id).await?;

        let subscription = self
            .feeds
            .messages
            .subscribe(request_id, || self.load_ordered(request_id))
            .await?;
        Ok(subscription)
    }

    async fn participant_request(
        &self,
        user_id: Uuid,
        role: Role,
        request_id: Uuid,
    ) -> Result<ServiceRequest, UsecaseError> {
        let request = self
            .request_repository
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| UsecaseError::NotFound("Request".to_string()))?;

        if role != Role::Admin && !request.is_participant(user_id) {
            tracing::warn!(%user_id, %request_id, "non-participant chat access attempt");
            return Err(UsecaseError::Forbidden(
                "Only the requester and the assigned worker can use this chat".to_string(),
            ));
        }
        Ok(request)
    }

    async fn load_ordered(&self, request_id: Uuid) -> Result<Vec<Message>, RepositoryError> {
        let mut messages = self.message_repository.find_by_request_id(request_id).await?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn refresh(&self, request_id: Uuid) {
        self.feeds
            .messages
            .refresh(&request_id, || self.load_ordered(request_id))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::domain::request::{RequestStatus, sample_request};
    use crate::usecase::contracts::{MockMessageRepository, MockRequestRepository, MockUserRepository};

    type TestUseCase = MessagesUseCase<MockMessageRepository, MockRequestRepository, MockUserRepository>;

    fn requests_returning(request: ServiceRequest) -> MockRequestRepository {
        let mut repo = MockRequestRepository::new();
        repo.expect_find_by_id().returning(move |_| Ok(Some(request.clone())));
        repo
    }

    fn nameless_users() -> MockUserRepository {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));
        repo
    }

    fn build(messages: MockMessageRepository, requests: MockRequestRepository) -> TestUseCase {
        MessagesUseCase::new(messages, requests, nameless_users(), Arc::new(Feeds::new(8)))
    }

    fn message_at(request_id: Uuid, body: &str, age_secs: i64) -> Message {
        let mut m = Message::new(request_id, Uuid::new_v4(), "x".to_string(), None, body.to_string());
        m.created_at = Utc::now() - Duration::seconds(age_secs);
        m
    }

    #[tokio::test]
    async fn test_fresh_subscription_is_oldest_first() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::EnRoute, Some(worker));
        let request_id = request.id;

        let mut messages = MockMessageRepository::new();
        messages.expect_find_by_request_id().returning(move |id| {
            Ok(vec![
                message_at(id, "third", 10),
                message_at(id, "first", 300),
                message_at(id, "second", 60),
            ])
        });

        let usecase = build(messages, requests_returning(request));
        let mut feed = usecase.subscribe(worker, Role::Mechanic, request_id).await.unwrap();

        let snapshot = feed.recv().await.unwrap();
        let bodies: Vec<&str> = snapshot.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_send_reaches_subscribers_with_recipient() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::Arrived, Some(worker));
        let request_id = request.id;
        let requester = request.user_id;
        let store: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));

        let mut messages = MockMessageRepository::new();
        {
            let store = store.clone();
            messages.expect_create().times(1).returning(move |m| {
                store.lock().unwrap().push(m.clone());
                Ok(())
            });
        }
        {
            let store = store.clone();
            messages
                .expect_find_by_request_id()
                .returning(move |_| Ok(store.lock().unwrap().clone()));
        }

        let usecase = build(messages, requests_returning(request));
        let mut feed = usecase.subscribe(requester, Role::User, request_id).await.unwrap();
        assert!(feed.recv().await.unwrap().is_empty());

        let sent = usecase
            .send_message(requester, "jane@example.com", request_id, "  I'm by the blue car  ".to_string())
            .await
            .unwrap();

        assert_eq!(sent.body, "I'm by the blue car");
        assert_eq!(sent.sender_name, "jane@example.com");
        assert_eq!(sent.recipient_id, Some(worker));
        assert!(!sent.read);

        let snapshot = feed.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, sent.id);
    }

    #[tokio::test]
    async fn test_outsiders_cannot_chat() {
        let request = sample_request(RequestStatus::Accepted, Some(Uuid::new_v4()));
        let request_id = request.id;

        let mut messages = MockMessageRepository::new();
        messages.expect_create().times(0);
        messages.expect_find_by_request_id().times(0);

        let usecase = build(messages, requests_returning(request));
        let outsider = Uuid::new_v4();

        assert!(matches!(
            usecase.send_message(outsider, "x", request_id, "hi".to_string()).await,
            Err(UsecaseError::Forbidden(_))
        ));
        assert!(matches!(
            usecase.subscribe(outsider, Role::Mechanic, request_id).await,
            Err(UsecaseError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_and_empty_messages_are_rejected() {
        let request = sample_request(RequestStatus::Completed, Some(Uuid::new_v4()));
        let request_id = request.id;
        let requester = request.user_id;

        let mut messages = MockMessageRepository::new();
        messages.expect_create().times(0);

        let usecase = build(messages, requests_returning(request));

        assert!(matches!(
            usecase.send_message(requester, "x", request_id, "   ".to_string()).await,
            Err(UsecaseError::Validation(_))
        ));
        assert!(matches!(
            usecase.send_message(requester, "x", request_id, "thanks!".to_string()).await,
            Err(UsecaseError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_read_only_refreshes_on_change() {
        let request = sample_request(RequestStatus::Started, Some(Uuid::new_v4()));
        let request_id = request.id;
        let requester = request.user_id;

        let mut messages = MockMessageRepository::new();
        messages
            .expect_mark_read()
            .withf(move |id, reader| *id == request_id && *reader == requester)
            .times(1)
            .returning(|_, _| Ok(2));

        let usecase = build(messages, requests_returning(request));

        assert_eq!(usecase.mark_read(requester, request_id).await.unwrap(), 2);
    }
}
