use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use roadside::config::AppConfig;
use roadside::repository::postgres::{
    PostgresCompletedJobRepository, PostgresMessageRepository, PostgresNotificationRepository,
    PostgresRequestRepository, PostgresUserRepository, create_pool,
};
use roadside::telemetry::{self, TelemetryConfig};
use roadside::usecase::admin::AdminUseCase;
use roadside::usecase::completed_jobs::CompletedJobsUseCase;
use roadside::usecase::events::EventPublisher;
use roadside::usecase::feed::Feeds;
use roadside::usecase::jwt::JwtService;
use roadside::usecase::messages::MessagesUseCase;
use roadside::usecase::nominatim::NominatimClient;
use roadside::usecase::notifications::NotificationsUseCase;
use roadside::usecase::requests::RequestsUseCase;
use roadside::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let telemetry_guard = if config.telemetry_enabled {
        let guard = telemetry::init_telemetry_with_subscriber(&TelemetryConfig::from(&config), env_filter)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to initialize telemetry")?;
        Some(guard)
    } else {
        telemetry::init_subscriber_without_telemetry(env_filter)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to initialize tracing")?;
        None
    };

    tracing::info!(telemetry_enabled = config.telemetry_enabled, "starting the roadside service");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    metrics_process::Collector::default().describe();
    tracing::info!("prometheus metrics initialized");

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to create database pool")?;
    tracing::info!("database pool created");

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("database migrations applied");

    let nats_client = match async_nats::connect(&config.nats_url).await {
        Ok(client) => {
            tracing::info!(nats_url = %config.nats_url, "connected to NATS");
            Some(client)
        }
        Err(e) => {
            tracing::warn!(error = %e, nats_url = %config.nats_url, "failed to connect to NATS, lifecycle events will not be published");
            None
        }
    };

    let geocoder = NominatimClient::new(
        config.nominatim_url.clone(),
        Duration::from_secs(config.geocode_timeout_secs),
    )
    .context("failed to build geocoding client")?;

    let feeds = Arc::new(Feeds::new(config.feed_capacity));

    let requests_usecase = RequestsUseCase::new(
        PostgresRequestRepository::new(pool.clone()),
        NotificationsUseCase::new(PostgresNotificationRepository::new(pool.clone()), feeds.clone()),
        PostgresUserRepository::new(pool.clone()),
        geocoder,
        feeds.clone(),
        EventPublisher::new(nats_client),
        chrono::Duration::seconds(config.max_fix_age_secs),
    );
    let messages_usecase = MessagesUseCase::new(
        PostgresMessageRepository::new(pool.clone()),
        PostgresRequestRepository::new(pool.clone()),
        PostgresUserRepository::new(pool.clone()),
        feeds.clone(),
    );
    let notifications_usecase =
        NotificationsUseCase::new(PostgresNotificationRepository::new(pool.clone()), feeds.clone());
    let completed_jobs_usecase = CompletedJobsUseCase::new(PostgresCompletedJobRepository::new(pool.clone()));
    let admin_usecase = AdminUseCase::new(
        PostgresUserRepository::new(pool.clone()),
        PostgresRequestRepository::new(pool),
    );

    let shared_state = Arc::new(AppState {
        requests_usecase,
        messages_usecase,
        notifications_usecase,
        completed_jobs_usecase,
        admin_usecase,
        jwt_service: JwtService::new(config.jwt_secret.clone()),
        metrics_handle,
    });

    let router = build_router(shared_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(listen_addr = %config.listen_addr, "roadside service running");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(guard) = telemetry_guard {
        guard.shutdown();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
