pub mod app_config;
pub mod booking_repo;
pub mod catalog_repo;
pub mod content_repo;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod redis_repo;

pub use booking_repo::PgBookingRepository;
pub use catalog_repo::PgCatalogRepository;
pub use content_repo::PgContentRepository;
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::{EventProducer, KafkaNotifier};
pub use redis_repo::{RedisClient, RedisFlowStore};
