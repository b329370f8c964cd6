use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::delivery::http::v1::middleware::{AuthenticatedUser, require_role};
use crate::domain::display::{Badge, status_badge, urgency_badge};
use crate::domain::geo::{PositionFix, RankedRequest, SortMode};
use crate::domain::request::{
    GeoPoint, Location, NewServiceRequest, RequestStatus, ServiceRequest, ServiceType, Urgency, VehicleType,
};
use crate::domain::user::Role;
use crate::usecase::error::UsecaseError;

#[derive(Debug, Clone, Serialize)]
pub struct RequestResponse {
    #[serde(flatten)]
    pub request: ServiceRequest,
    pub status_badge: Badge,
    pub urgency_badge: Badge,
    pub location_display: String,
    pub estimated_pay: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_miles: Option<f64>,
}

impl From<ServiceRequest> for RequestResponse {
    fn from(request: ServiceRequest) -> Self {
        Self {
            status_badge: status_badge(request.status),
            urgency_badge: urgency_badge(request.urgency),
            location_display: request.location.display(),
            estimated_pay: request.service_type.estimated_pay(),
            distance_miles: None,
            request,
        }
    }
}

impl From<RankedRequest> for RequestResponse {
    fn from(ranked: RankedRequest) -> Self {
        Self {
            distance_miles: ranked.distance_miles,
            ..Self::from(ranked.request)
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LocationBody {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
    #[validate(length(max = 300))]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestBody {
    pub service_type: ServiceType,
    pub vehicle_type: VehicleType,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[serde(default = "default_urgency")]
    pub urgency: Urgency,
    #[validate(nested)]
    pub location: LocationBody,
    #[validate(url)]
    pub photo_url: Option<String>,
}

fn default_urgency() -> Urgency {
    Urgency::Normal
}

impl From<CreateRequestBody> for NewServiceRequest {
    fn from(body: CreateRequestBody) -> Self {
        Self {
            service_type: body.service_type,
            vehicle_type: body.vehicle_type,
            description: body.description,
            urgency: body.urgency,
            location: Location {
                lat: body.location.lat,
                lng: body.location.lng,
                address: body.location.address,
            },
            photo_url: body.photo_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdvanceStatusBody {
    pub status: RequestStatus,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelBody {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Sort and reference position for the worker view of pending requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingQuery {
    pub sort: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub fix_age_secs: Option<i64>,
}

impl PendingQuery {
    pub fn sort_mode(&self) -> Result<SortMode, UsecaseError> {
        match self.sort.as_deref() {
            None | Some("") => Ok(SortMode::default()),
            Some(s) => s
                .parse::<SortMode>()
                .map_err(|e| UsecaseError::Validation(e.to_string())),
        }
    }

    /// `None` without both coordinates, or when the reported age is out of range.
    pub fn position_fix(&self) -> Option<PositionFix> {
        let (lat, lng) = (self.lat?, self.lng?);
        let age = Duration::try_seconds(self.fix_age_secs.unwrap_or(0).max(0))?;
        Some(PositionFix {
            point: GeoPoint::new(lat, lng),
            captured_at: Utc::now().checked_sub_signed(age)?,
        })
    }
}

fn validate<T: Validate>(payload: &T, user: &AuthenticatedUser) -> Result<(), UsecaseError> {
    if let Err(validation_errors) = payload.validate() {
        tracing::warn!(user_id = %user.user_id, ?validation_errors, "validation failed");
        return Err(UsecaseError::Validation(format!("{validation_errors}")));
    }
    Ok(())
}

#[tracing::instrument(skip(state, payload), fields(user_id = %user.user_id))]
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateRequestBody>,
) -> Result<impl IntoResponse, UsecaseError> {
    tracing::debug!("handling create request");
    require_role(&user, &[Role::User])?;
    validate(&payload, &user)?;

    let request = state
        .requests_usecase
        .create_request(user.user_id, payload.into())
        .await?;

    tracing::debug!(request_id = %request.id, "request created successfully");
    Ok((StatusCode::CREATED, Json(RequestResponse::from(request))))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_my_requests(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    let requests = state.requests_usecase.list_my_requests(user.user_id).await?;
    let response: Vec<RequestResponse> = requests.into_iter().map(RequestResponse::from).collect();

    tracing::debug!(count = response.len(), "requests listed successfully");
    Ok((StatusCode::OK, Json(response)))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<PendingQuery>,
) -> Result<impl IntoResponse, UsecaseError> {
    require_role(&user, &[Role::Mechanic])?;

    let ranked = state
        .requests_usecase
        .list_pending(query.sort_mode()?, query.position_fix())
        .await?;
    let response: Vec<RequestResponse> = ranked.into_iter().map(RequestResponse::from).collect();

    tracing::debug!(count = response.len(), "pending requests listed");
    Ok((StatusCode::OK, Json(response)))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, %request_id))]
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, UsecaseError> {
    let request = state
        .requests_usecase
        .get_request(user.user_id, user.role, request_id)
        .await?;

    Ok((StatusCode::OK, Json(RequestResponse::from(request))))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, %request_id))]
pub async fn accept_request(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, UsecaseError> {
    tracing::debug!("handling accept request");
    require_role(&user, &[Role::Mechanic])?;

    let request = state
        .requests_usecase
        .accept_request(user.user_id, request_id)
        .await?;

    Ok((StatusCode::OK, Json(RequestResponse::from(request))))
}

#[tracing::instrument(skip(state, payload), fields(user_id = %user.user_id, %request_id, status = %payload.status))]
pub async fn advance_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<AdvanceStatusBody>,
) -> Result<impl IntoResponse, UsecaseError> {
    tracing::debug!("handling status update");
    require_role(&user, &[Role::Mechanic])?;

    let request = state
        .requests_usecase
        .advance_status(user.user_id, request_id, payload.status)
        .await?;

    Ok((StatusCode::OK, Json(RequestResponse::from(request))))
}

#[tracing::instrument(skip(state, payload), fields(user_id = %user.user_id, %request_id))]
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(request_id): Path<Uuid>,
    payload: Option<Json<CancelBody>>,
) -> Result<impl IntoResponse, UsecaseError> {
    tracing::debug!("handling cancel request");

    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    validate(&payload, &user)?;

    let request = state
        .requests_usecase
        .cancel_request(user.user_id, request_id, payload.reason)
        .await?;

    Ok((StatusCode::OK, Json(RequestResponse::from(request))))
}
