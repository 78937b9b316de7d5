use anyhow::Context;
use mockprep_api::state::{AppState, AuthConfig, Collaborators, RateLimitConfig, Repositories};
use mockprep_api::{app_with_origins, worker};
use mockprep_booking::{FlowStore, HmacPaymentGateway, MemoryFlowStore};
use mockprep_core::memory::MemoryStore;
use mockprep_core::notify::{LogNotifier, Notifier};
use mockprep_core::SystemClock;
use mockprep_store::app_config::{Config, StorageBackend};
use mockprep_store::{DbClient, RedisClient, RedisFlowStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mockprep_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting MockPrep API on port {}", config.server.port);

    // Storage
    let repos = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Repositories::in_memory(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database).await.context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Repositories::postgres(&db)
        }
    };

    // Redis: flows and rate limiting
    let redis = if config.redis.enabled() {
        let client = RedisClient::new(&config.redis.url).await.context("Failed to connect to Redis")?;
        Some(client)
    } else {
        None
    };
    let flows: Arc<dyn FlowStore> = match &redis {
        Some(client) => Arc::new(RedisFlowStore::new(client.clone())),
        None => Arc::new(MemoryFlowStore::new()),
    };

    let deps = Collaborators {
        flows,
        payments: Arc::new(HmacPaymentGateway::new(config.payment.webhook_secret.clone())),
        notifier: notifier(&config)?,
        clock: Arc::new(SystemClock),
    };

    let mut app_state = AppState::new(
        &repos,
        deps,
        config.booking.policy(),
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    );
    if let Some(client) = redis {
        app_state = app_state.with_rate_limit(
            Arc::new(client),
            RateLimitConfig {
                requests: config.redis.rate_limit_requests,
                window_seconds: config.redis.rate_limit_window_seconds,
            },
        );
    }

    // Background sweeper
    tokio::spawn(worker::start_sweeper(
        app_state.orchestrator.clone(),
        Duration::from_secs(config.booking.sweep_interval_seconds.max(1)),
    ));

    let app = app_with_origins(app_state, &config.server.allowed_origins);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[cfg(feature = "kafka")]
fn notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    if config.kafka.brokers.trim().is_empty() {
        return Ok(Arc::new(LogNotifier));
    }
    let producer = mockprep_store::EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
    Ok(Arc::new(mockprep_store::KafkaNotifier::new(producer)))
}

#[cfg(not(feature = "kafka"))]
fn notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    if !config.kafka.brokers.trim().is_empty() {
        tracing::warn!("Kafka brokers configured but the kafka feature is disabled; logging events instead");
    }
    Ok(Arc::new(LogNotifier))
}
