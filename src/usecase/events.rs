use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::request::{RequestStatus, ServiceRequest};

pub const REQUEST_EVENTS_SUBJECT: &str = "requests.events";

#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub status: RequestStatus,
    pub actor_id: Uuid,
    pub at: DateTime<Utc>,
}

impl RequestEvent {
    pub fn new(request: &ServiceRequest, actor_id: Uuid) -> Self {
        Self {
            request_id: request.id,
            user_id: request.user_id,
            assigned_to: request.assigned_to,
            status: request.status,
            actor_id,
            at: request.updated_at,
        }
    }
}

/// Best-effort lifecycle event publishing. Without a NATS connection every publish is a no-op.
#[derive(Clone, Default)]
pub struct EventPublisher {
    client: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(client: Option<async_nats::Client>) -> Self {
        Self { client }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn publish(&self, event: &RequestEvent) {
        let Some(client) = &self.client else {
            return;
        };

        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(request_id = %event.request_id, error = %e, "failed to serialize request event");
                return;
            }
        };

        match client.publish(REQUEST_EVENTS_SUBJECT, payload.into()).await {
            Ok(()) => {
                tracing::debug!(
                    request_id = %event.request_id,
                    status = %event.status,
                    "published request event to NATS"
                );
            }
            Err(e) => {
                tracing::error!(
                    request_id = %event.request_id,
                    error = %e,
                    "failed to publish request event to NATS"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::sample_request;

    #[test]
    fn test_event_payload_shape() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::EnRoute, Some(worker));
        let event = RequestEvent::new(&request, worker);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "en_route");
        assert_eq!(json["actor_id"], worker.to_string());
    }

    #[tokio::test]
    async fn test_disabled_publisher_is_noop() {
        let request = sample_request(RequestStatus::Pending, None);
        EventPublisher::disabled()
            .publish(&RequestEvent::new(&request, request.user_id))
            .await;
    }
}
