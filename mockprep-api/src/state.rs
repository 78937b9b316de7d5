use mockprep_booking::{
    BookingLedger, BookingOrchestrator, BookingPolicy, FlowStore, ReservationManager,
};
use mockprep_catalog::{AvailabilityStore, Catalog};
use mockprep_core::memory::MemoryStore;
use mockprep_core::notify::Notifier;
use mockprep_core::payment::PaymentAdapter;
use mockprep_core::repository::{
    BookingRepository, CatalogRepository, ContentRepository, HoldRepository, SlotRepository,
};
use mockprep_core::Clock;
use mockprep_store::{DbClient, PgBookingRepository, PgCatalogRepository, PgContentRepository, RedisClient};
use std::sync::Arc;
use std::time::Duration;

use crate::middleware::resiliency::CircuitBreaker;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone, Copy)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests: 60, window_seconds: 60 }
    }
}

pub struct ResiliencyState {
    pub payment_cb: CircuitBreaker,
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self {
            payment_cb: CircuitBreaker::new("payment-gateway", 5, Duration::from_secs(30)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BookingOrchestrator,
    pub content: Arc<dyn ContentRepository>,
    pub clock: Arc<dyn Clock>,
    /// Rate limiting is skipped when no Redis is configured.
    pub redis: Option<Arc<RedisClient>>,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub resiliency: Arc<ResiliencyState>,
}

// ============================================================================
// Wiring
// ============================================================================

/// One storage backend seen through every repository trait.
#[derive(Clone)]
pub struct Repositories {
    pub catalog: Arc<dyn CatalogRepository>,
    pub slots: Arc<dyn SlotRepository>,
    pub holds: Arc<dyn HoldRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub content: Arc<dyn ContentRepository>,
}

impl Repositories {
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            catalog: store.clone(),
            slots: store.clone(),
            holds: store.clone(),
            bookings: store.clone(),
            content: store,
        }
    }

    pub fn postgres(db: &DbClient) -> Self {
        let catalog = Arc::new(PgCatalogRepository::new(db.pool.clone()));
        let bookings = Arc::new(PgBookingRepository::new(db.pool.clone()));
        Self {
            catalog: catalog.clone(),
            slots: catalog,
            holds: bookings.clone(),
            bookings,
            content: Arc::new(PgContentRepository::new(db.pool.clone())),
        }
    }
}

/// Collaborators that sit outside the storage backend.
pub struct Collaborators {
    pub flows: Arc<dyn FlowStore>,
    pub payments: Arc<dyn PaymentAdapter>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

pub fn build_orchestrator(repos: &Repositories, deps: Collaborators, policy: BookingPolicy) -> BookingOrchestrator {
    let Collaborators { flows, payments, notifier, clock } = deps;

    let catalog = Catalog::new(repos.catalog.clone());
    let availability = AvailabilityStore::new(repos.slots.clone(), repos.catalog.clone(), clock.clone());
    let reservations = ReservationManager::new(
        repos.holds.clone(),
        repos.slots.clone(),
        clock.clone(),
        policy.hold_ttl,
        policy.duplicate_holds,
    );
    let ledger = BookingLedger::new(repos.bookings.clone(), notifier, clock.clone(), policy.pay_later_deadline);

    BookingOrchestrator::new(catalog, availability, reservations, ledger, payments, flows, clock, policy)
}

impl AppState {
    pub fn new(
        repos: &Repositories,
        deps: Collaborators,
        policy: BookingPolicy,
        auth: AuthConfig,
    ) -> Self {
        let clock = deps.clock.clone();
        Self {
            orchestrator: build_orchestrator(repos, deps, policy),
            content: repos.content.clone(),
            clock,
            redis: None,
            auth,
            rate_limit: RateLimitConfig::default(),
            resiliency: Arc::new(ResiliencyState::default()),
        }
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, limit: RateLimitConfig) -> Self {
        self.redis = Some(redis);
        self.rate_limit = limit;
        self
    }
}
