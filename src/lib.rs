pub mod client;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod repository;
pub mod telemetry;
pub mod usecase;

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::delivery::http::v1::{admin, jobs, messages, meta, middleware::auth_middleware, notifications, requests, ws};
use crate::repository::postgres::{
    PostgresCompletedJobRepository, PostgresMessageRepository, PostgresNotificationRepository,
    PostgresRequestRepository, PostgresUserRepository,
};
use crate::usecase::admin::AdminUseCase;
use crate::usecase::completed_jobs::CompletedJobsUseCase;
use crate::usecase::jwt::JwtService;
use crate::usecase::messages::MessagesUseCase;
use crate::usecase::nominatim::NominatimClient;
use crate::usecase::notifications::NotificationsUseCase;
use crate::usecase::requests::RequestsUseCase;

pub struct AppState {
    pub requests_usecase: RequestsUseCase<
        PostgresRequestRepository,
        PostgresNotificationRepository,
        PostgresUserRepository,
        NominatimClient,
    >,
    pub messages_usecase:
        MessagesUseCase<PostgresMessageRepository, PostgresRequestRepository, PostgresUserRepository>,
    pub notifications_usecase: NotificationsUseCase<PostgresNotificationRepository>,
    pub completed_jobs_usecase: CompletedJobsUseCase<PostgresCompletedJobRepository>,
    pub admin_usecase: AdminUseCase<PostgresUserRepository, PostgresRequestRepository>,
    pub jwt_service: JwtService,
    pub metrics_handle: PrometheusHandle,
}

pub fn build_router(shared_state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/requests",
            get(requests::list_my_requests).post(requests::create_request),
        )
        .route("/api/v1/requests/pending", get(requests::list_pending))
        .route("/api/v1/requests/{id}", get(requests::get_request))
        .route("/api/v1/requests/{id}/accept", post(requests::accept_request))
        .route("/api/v1/requests/{id}/status", post(requests::advance_status))
        .route("/api/v1/requests/{id}/cancel", post(requests::cancel_request))
        .route(
            "/api/v1/requests/{id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/api/v1/requests/{id}/messages/read", post(messages::mark_messages_read))
        .route("/api/v1/notifications", get(notifications::list_notifications))
        .route("/api/v1/notifications/unread-count", get(notifications::get_unread_count))
        .route("/api/v1/notifications/read-all", post(notifications::mark_all_as_read))
        .route("/api/v1/notifications/{id}/read", post(notifications::mark_as_read))
        .route("/api/v1/jobs/completed", get(jobs::list_completed_jobs))
        .route("/api/v1/admin/users", get(admin::list_users))
        .route("/api/v1/admin/requests", get(admin::list_requests))
        .route("/api/v1/admin/analytics", get(admin::get_analytics))
        .layer(middleware::from_fn_with_state(
            shared_state.clone(),
            auth_middleware,
        ));

    // WebSocket clients authenticate with a `token` query parameter instead.
    let feeds = Router::new()
        .route("/api/v1/ws/requests/pending", get(ws::pending_requests_ws))
        .route("/api/v1/ws/requests/{id}/messages", get(ws::messages_ws))
        .route("/api/v1/ws/notifications", get(ws::notifications_ws));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/v1/meta/labels", get(meta::get_labels))
        .merge(api)
        .merge(feeds)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    metrics_process::Collector::default().collect();
    state.metrics_handle.render()
}

#[tracing::instrument]
async fn healthz() -> &'static str {
    "OK"
}
