use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub request_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub recipient_id: Option<Uuid>,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        request_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        recipient_id: Option<Uuid>,
        body: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            sender_id,
            sender_name,
            recipient_id,
            body,
            read: false,
            created_at: Utc::now(),
        }
    }
}
