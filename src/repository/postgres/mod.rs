use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::{
    domain::completed_job::CompletedJob,
    domain::message::Message,
    domain::notification::Notification,
    domain::request::{Location, RequestStatus, ServiceRequest},
    domain::user::{Role, User},
    repository::errors::RepositoryError,
    usecase::contracts::{
        CompletedJobRepository, MessageRepository, NotificationRepository, RequestCounts,
        RequestRepository, UserRepository,
    },
};

fn parse<T>(value: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| RepositoryError::DatabaseError(e.to_string()))
}

const REQUEST_COLUMNS: &str = "id, user_id, service_type, vehicle_type, description, urgency, \
     lat, lng, address, photo_url, status, assigned_to, accepted_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    user_id: Uuid,
    service_type: String,
    vehicle_type: String,
    description: Option<String>,
    urgency: String,
    lat: f64,
    lng: f64,
    address: Option<String>,
    photo_url: Option<String>,
    status: String,
    assigned_to: Option<Uuid>,
    accepted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for ServiceRequest {
    type Error = RepositoryError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(ServiceRequest {
            id: row.id,
            user_id: row.user_id,
            service_type: parse(&row.service_type)?,
            vehicle_type: parse(&row.vehicle_type)?,
            description: row.description,
            urgency: parse(&row.urgency)?,
            location: Location {
                lat: row.lat,
                lng: row.lng,
                address: row.address,
            },
            photo_url: row.photo_url,
            status: parse(&row.status)?,
            assigned_to: row.assigned_to,
            accepted_at: row.accepted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_requests(rows: Vec<RequestRow>) -> Result<Vec<ServiceRequest>, RepositoryError> {
    rows.into_iter().map(ServiceRequest::try_from).collect()
}

fn into_request(row: Option<RequestRow>) -> Result<Option<ServiceRequest>, RepositoryError> {
    row.map(ServiceRequest::try_from).transpose()
}

pub struct PostgresRequestRepository {
    pool: PgPool,
}

impl PostgresRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl RequestRepository for PostgresRequestRepository {
    #[tracing::instrument(skip(self, request), fields(request_id = %request.id, user_id = %request.user_id))]
    async fn create(&self, request: &ServiceRequest) -> Result<(), RepositoryError> {
        tracing::debug!("creating request");

        sqlx::query(
            r#"
            INSERT INTO requests (id, user_id, service_type, vehicle_type, description, urgency,
                                  lat, lng, address, photo_url, status, assigned_to, accepted_at,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#
        )
        .bind(request.id)
        .bind(request.user_id)
        .bind(request.service_type.as_str())
        .bind(request.vehicle_type.as_str())
        .bind(&request.description)
        .bind(request.urgency.as_str())
        .bind(request.location.lat)
        .bind(request.location.lng)
        .bind(&request.location.address)
        .bind(&request.photo_url)
        .bind(request.status.as_str())
        .bind(request.assigned_to)
        .bind(request.accepted_at)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(request_id = %request.id, "request created successfully");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(request_id = %id))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ServiceRequest>, RepositoryError> {
        tracing::debug!("finding request by id");

        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        into_request(row)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<ServiceRequest>, RepositoryError> {
        tracing::debug!("finding requests by user_id");

        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(user_id = %user_id, count = rows.len(), "found requests");
        into_requests(rows)
    }

    #[tracing::instrument(skip(self))]
    async fn find_pending(&self) -> Result<Vec<ServiceRequest>, RepositoryError> {
        tracing::debug!("finding pending requests");

        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE status = 'pending' ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = rows.len(), "found pending requests");
        into_requests(rows)
    }

    #[tracing::instrument(skip(self))]
    async fn find_all(&self) -> Result<Vec<ServiceRequest>, RepositoryError> {
        tracing::debug!("finding all requests");

        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = rows.len(), "found requests");
        into_requests(rows)
    }

    #[tracing::instrument(skip(self), fields(request_id = %id, worker_id = %worker_id))]
    async fn accept_pending(
        &self,
        id: Uuid,
        worker_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ServiceRequest>, RepositoryError> {
        tracing::debug!("accepting pending request");

        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            UPDATE requests
            SET status = 'accepted', assigned_to = $2, accepted_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'pending' AND assigned_to IS NULL
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(worker_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(request_id = %id, accepted = row.is_some(), "accept attempted");
        into_request(row)
    }

    #[tracing::instrument(skip(self), fields(request_id = %id, worker_id = %worker_id, %from, %to))]
    async fn advance_status(
        &self,
        id: Uuid,
        worker_id: Uuid,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ServiceRequest>, RepositoryError> {
        tracing::debug!("advancing request status");

        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            UPDATE requests
            SET status = $4, updated_at = $5
            WHERE id = $1 AND assigned_to = $2 AND status = $3
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(worker_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        into_request(row)
    }

    #[tracing::instrument(skip(self, job), fields(request_id = %id, worker_id = %worker_id))]
    async fn complete(
        &self,
        id: Uuid,
        worker_id: Uuid,
        job: &CompletedJob,
    ) -> Result<Option<ServiceRequest>, RepositoryError> {
        tracing::debug!("completing request");

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            UPDATE requests
            SET status = 'completed', updated_at = $3
            WHERE id = $1 AND assigned_to = $2 AND status = 'started'
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(worker_id)
        .bind(job.completed_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            tracing::debug!(request_id = %id, "request not in a completable state");
            return Ok(None);
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO completed_jobs (id, request_id, worker_id, customer_name, customer_phone,
                                        service_type, vehicle_type, location, lat, lng,
                                        estimated_pay, accepted_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (request_id) DO NOTHING
            "#
        )
        .bind(job.id)
        .bind(job.request_id)
        .bind(job.worker_id)
        .bind(&job.customer_name)
        .bind(&job.customer_phone)
        .bind(job.service_type.as_str())
        .bind(job.vehicle_type.as_str())
        .bind(&job.location)
        .bind(job.lat)
        .bind(job.lng)
        .bind(&job.estimated_pay)
        .bind(job.accepted_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tracing::warn!(request_id = %id, "completed job already archived");
        }

        tx.commit().await?;

        tracing::debug!(request_id = %id, "request completed and archived");
        into_request(Some(row))
    }

    #[tracing::instrument(skip(self), fields(request_id = %id, %from))]
    async fn cancel(
        &self,
        id: Uuid,
        from: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ServiceRequest>, RepositoryError> {
        tracing::debug!("cancelling request");

        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            UPDATE requests
            SET status = 'cancelled', assigned_to = NULL, updated_at = $3
            WHERE id = $1 AND status = $2
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        into_request(row)
    }

    #[tracing::instrument(skip(self))]
    async fn counts(&self) -> Result<RequestCounts, RepositoryError> {
        let (total, pending, completed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status = 'pending'),
                   COUNT(*) FILTER (WHERE status = 'completed')
            FROM requests
            "#
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(RequestCounts { total, pending, completed })
    }
}

pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MessageRepository for PostgresMessageRepository {
    #[tracing::instrument(skip(self, message), fields(message_id = %message.id, request_id = %message.request_id))]
    async fn create(&self, message: &Message) -> Result<(), RepositoryError> {
        tracing::debug!("creating message");

        sqlx::query(
            r#"
            INSERT INTO messages (id, request_id, sender_id, sender_name, recipient_id, body, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#
        )
        .bind(message.id)
        .bind(message.request_id)
        .bind(message.sender_id)
        .bind(&message.sender_name)
        .bind(message.recipient_id)
        .bind(&message.body)
        .bind(message.read)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(request_id = %request_id))]
    async fn find_by_request_id(&self, request_id: Uuid) -> Result<Vec<Message>, RepositoryError> {
        tracing::debug!("finding messages by request_id");

        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, request_id, sender_id, sender_name, recipient_id, body, read, created_at
            FROM messages
            WHERE request_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(request_id = %request_id, count = messages.len(), "found messages");
        Ok(messages)
    }

    #[tracing::instrument(skip(self), fields(request_id = %request_id, reader_id = %reader_id))]
    async fn mark_read(&self, request_id: Uuid, reader_id: Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET read = TRUE
            WHERE request_id = $1 AND sender_id <> $2 AND read = FALSE
            "#
        )
        .bind(request_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    body: String,
    notification_type: String,
    data: serde_json::Value,
    read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = RepositoryError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            body: row.body,
            notification_type: parse(&row.notification_type)?,
            data: row.data,
            read: row.read,
            created_at: row.created_at,
        })
    }
}

pub struct PostgresNotificationRepository {
    pool: PgPool,
}

impl PostgresNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl NotificationRepository for PostgresNotificationRepository {
    #[tracing::instrument(skip(self, notification), fields(notification_id = %notification.id, user_id = %notification.user_id))]
    async fn create(&self, notification: &Notification) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, title, body, notification_type, data, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.notification_type.as_str())
        .bind(&notification.data)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id, %limit, %offset))]
    async fn find_by_user_id(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, user_id, title, body, notification_type, data, read, created_at
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Notification::try_from).collect()
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn count_unread(&self, user_id: Uuid) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read = FALSE"
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(notification_id = %id, user_id = %user_id))]
    async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE id = $1 AND user_id = $2"
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE user_id = $1 AND read = FALSE"
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(user_id = %user_id, updated = result.rows_affected(), "notifications marked as read");
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct CompletedJobRow {
    id: Uuid,
    request_id: Uuid,
    worker_id: Uuid,
    customer_name: String,
    customer_phone: Option<String>,
    service_type: String,
    vehicle_type: String,
    location: String,
    lat: f64,
    lng: f64,
    estimated_pay: String,
    accepted_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl TryFrom<CompletedJobRow> for CompletedJob {
    type Error = RepositoryError;

    fn try_from(row: CompletedJobRow) -> Result<Self, Self::Error> {
        Ok(CompletedJob {
            id: row.id,
            request_id: row.request_id,
            worker_id: row.worker_id,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            service_type: parse(&row.service_type)?,
            vehicle_type: parse(&row.vehicle_type)?,
            location: row.location,
            lat: row.lat,
            lng: row.lng,
            estimated_pay: row.estimated_pay,
            accepted_at: row.accepted_at,
            completed_at: row.completed_at,
        })
    }
}

const COMPLETED_JOB_COLUMNS: &str = "id, request_id, worker_id, customer_name, customer_phone, \
     service_type, vehicle_type, location, lat, lng, estimated_pay, accepted_at, completed_at";

pub struct PostgresCompletedJobRepository {
    pool: PgPool,
}

impl PostgresCompletedJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CompletedJobRepository for PostgresCompletedJobRepository {
    #[tracing::instrument(skip(self), fields(worker_id = %worker_id, %limit))]
    async fn find_by_worker_id(&self, worker_id: Uuid, limit: i64) -> Result<Vec<CompletedJob>, RepositoryError> {
        let rows = sqlx::query_as::<_, CompletedJobRow>(&format!(
            "SELECT {COMPLETED_JOB_COLUMNS} FROM completed_jobs WHERE worker_id = $1 ORDER BY completed_at DESC LIMIT $2"
        ))
        .bind(worker_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(CompletedJob::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    phone: Option<String>,
    role: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            role: parse(&row.role)?,
            status: parse(&row.status)?,
            created_at: row.created_at,
        })
    }
}

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserRepository for PostgresUserRepository {
    #[tracing::instrument(skip(self), fields(user_id = %id))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, phone, role, status, created_at FROM users WHERE id = $1"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        row.map(User::try_from).transpose()
    }

    #[tracing::instrument(skip(self), fields(%role))]
    async fn find_by_role(&self, role: Role) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, phone, role, status, created_at
            FROM users
            WHERE role = $1
            ORDER BY created_at DESC
            "#
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(User::try_from).collect()
    }

    #[tracing::instrument(skip(self), fields(%role))]
    async fn count_by_role(&self, role: Role) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = $1")
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
