use chrono::Duration;
use mockprep_booking::{BookingPolicy, DuplicateHoldPolicy};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub booking: BookingConfig,
    pub payment: PaymentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: String,
    pub rate_limit_requests: i64,
    pub rate_limit_window_seconds: i64,
}

impl RedisConfig {
    pub fn enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    #[serde(default)]
    pub brokers: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingConfig {
    pub hold_ttl_seconds: i64,
    pub max_payment_attempts: u32,
    pub pay_later_deadline_hours: i64,
    pub flow_retention_seconds: i64,
    pub sweep_interval_seconds: u64,
    pub currency: String,
    pub meeting_base_url: String,
    #[serde(default)]
    pub duplicate_holds: DuplicateHoldPolicy,
}

impl BookingConfig {
    pub fn policy(&self) -> BookingPolicy {
        BookingPolicy {
            hold_ttl: Duration::seconds(self.hold_ttl_seconds),
            max_payment_attempts: self.max_payment_attempts.max(1),
            pay_later_deadline: Duration::hours(self.pay_later_deadline_hours),
            flow_retention: Duration::seconds(self.flow_retention_seconds),
            currency: self.currency.clone(),
            meeting_base_url: self.meeting_base_url.clone(),
            duplicate_holds: self.duplicate_holds,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub webhook_secret: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Machine-local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `MOCKPREP__BOOKING__HOLD_TTL_SECONDS=600`
            .add_source(config::Environment::with_prefix("MOCKPREP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
