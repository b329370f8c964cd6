use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    #[serde(default)]
    pub telemetry_enabled: bool,
    #[serde(default = "default_telemetry_service_name")]
    pub telemetry_service_name: String,
    #[serde(default = "default_telemetry_service_version")]
    pub telemetry_service_version: String,
    #[serde(default = "default_telemetry_environment")]
    pub telemetry_environment: String,
    #[serde(default = "default_telemetry_otlp_endpoint")]
    pub telemetry_otlp_endpoint: String,
    #[serde(default = "default_nats_url")]
    pub nats_url: String,
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,
    pub geocode_timeout_secs: u64,
    pub max_fix_age_secs: i64,
    pub feed_capacity: usize,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_telemetry_service_name() -> String {
    "roadside".to_string()
}

fn default_telemetry_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_telemetry_environment() -> String {
    "production".to_string()
}

fn default_telemetry_otlp_endpoint() -> String {
    "http://otel-collector.observability.svc.cluster.local:4317".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default())
    }

    fn from_environment(source: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("database_max_connections", 5)?
            .set_default("geocode_timeout_secs", 10)?
            .set_default("max_fix_age_secs", 60)?
            .set_default("feed_capacity", 64)?
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}
