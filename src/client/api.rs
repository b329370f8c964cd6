use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::client::{ClientError, JobGateway};
use crate::domain::completed_job::CompletedJob;
use crate::domain::geo::{PositionFix, SortMode};
use crate::domain::request::{RequestStatus, ServiceRequest};

#[derive(Serialize)]
struct StatusBody {
    status: RequestStatus,
}

#[derive(Serialize)]
struct CancelBody<'a> {
    reason: Option<&'a str>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent("roadside-client/1.0")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let resp = request.bearer_auth(&self.token).send().await?;
        let status = resp.status();

        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let message = resp.text().await.unwrap_or_default();
        tracing::debug!(%status, %message, "api call failed");
        Err(match status {
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
            StatusCode::FORBIDDEN => ClientError::Forbidden(message),
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::CONFLICT => ClientError::Conflict(message),
            _ => ClientError::Status {
                status: status.as_u16(),
                message,
            },
        })
    }

    #[tracing::instrument(skip(self, fix))]
    pub async fn pending_requests(
        &self,
        sort: SortMode,
        fix: Option<PositionFix>,
    ) -> Result<Vec<ServiceRequest>, ClientError> {
        let sort = match sort {
            SortMode::Recent => "recent",
            SortMode::Nearest => "nearest",
            SortMode::Urgency => "urgency",
        };
        let mut query = vec![("sort", sort.to_string())];
        if let Some(fix) = fix {
            let age = chrono::Utc::now()
                .signed_duration_since(fix.captured_at)
                .num_seconds()
                .max(0);
            query.push(("lat", fix.point.lat.to_string()));
            query.push(("lng", fix.point.lng.to_string()));
            query.push(("fix_age_secs", age.to_string()));
        }

        self.send(self.client.get(self.url("/requests/pending")).query(&query))
            .await
    }

    pub async fn cancel(&self, id: Uuid, reason: Option<&str>) -> Result<ServiceRequest, ClientError> {
        self.send(
            self.client
                .post(self.url(&format!("/requests/{id}/cancel")))
                .json(&CancelBody { reason }),
        )
        .await
    }

    pub async fn completed_jobs(&self, limit: Option<i64>) -> Result<Vec<CompletedJob>, ClientError> {
        let mut request = self.client.get(self.url("/jobs/completed"));
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        self.send(request).await
    }
}

impl JobGateway for ApiClient {
    async fn fetch(&self, id: Uuid) -> Result<ServiceRequest, ClientError> {
        self.send(self.client.get(self.url(&format!("/requests/{id}"))))
            .await
    }

    async fn accept(&self, id: Uuid) -> Result<ServiceRequest, ClientError> {
        self.send(self.client.post(self.url(&format!("/requests/{id}/accept"))))
            .await
    }

    async fn advance(&self, id: Uuid, to: RequestStatus) -> Result<ServiceRequest, ClientError> {
        self.send(
            self.client
                .post(self.url(&format!("/requests/{id}/status")))
                .json(&StatusBody { status: to }),
        )
        .await
    }
}
