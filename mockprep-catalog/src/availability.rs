use chrono::{DateTime, Duration, Utc};
use mockprep_core::models::Slot;
use mockprep_core::repository::{CatalogRepository, SlotRepository};
use mockprep_core::{Clock, CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Longest window a single slot listing may cover.
pub const MAX_RANGE_DAYS: i64 = 92;

/// Half-open interval `[from, to)` of session start times.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> CoreResult<Self> {
        if to <= from {
            return Err(CoreError::ValidationError("date range end must be after its start".into()));
        }
        if to - from > Duration::days(MAX_RANGE_DAYS) {
            return Err(CoreError::ValidationError(format!(
                "date range may span at most {} days",
                MAX_RANGE_DAYS
            )));
        }
        Ok(Self { from, to })
    }

    /// The default window: from now, two weeks ahead.
    pub fn upcoming(now: DateTime<Utc>) -> Self {
        Self { from: now, to: now + Duration::days(14) }
    }
}

/// Per-service slot calendar.
#[derive(Clone)]
pub struct AvailabilityStore {
    slots: Arc<dyn SlotRepository>,
    catalog: Arc<dyn CatalogRepository>,
    clock: Arc<dyn Clock>,
}

impl AvailabilityStore {
    pub fn new(slots: Arc<dyn SlotRepository>, catalog: Arc<dyn CatalogRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { slots, catalog, clock }
    }

    /// Slots in range with room for another hold. Slots that already started are never offered.
    pub async fn list_slots(&self, service_id: &str, range: DateRange) -> CoreResult<Vec<Slot>> {
        if self.catalog.get_service(service_id).await?.is_none() {
            return Err(CoreError::not_found("service", service_id));
        }

        let now = self.clock.now();
        let from = range.from.max(now);
        if from >= range.to {
            return Ok(Vec::new());
        }

        let slots = self.slots.list_slots(service_id, from, range.to, now).await?;
        Ok(slots.into_iter().filter(|s| s.has_room()).collect())
    }

    pub async fn get_slot(&self, id: Uuid) -> CoreResult<Slot> {
        self.slots
            .get_slot(id, self.clock.now())
            .await?
            .ok_or_else(|| CoreError::not_found("slot", id))
    }

    pub async fn create_slot(&self, service_id: &str, starts_at: DateTime<Utc>, capacity: u32) -> CoreResult<Slot> {
        let service = self
            .catalog
            .get_service(service_id)
            .await?
            .ok_or_else(|| CoreError::not_found("service", service_id))?;

        if !service.is_bookable {
            return Err(CoreError::ValidationError(format!("service '{}' is not bookable", service_id)));
        }
        if capacity == 0 {
            return Err(CoreError::ValidationError("slot capacity must be at least 1".into()));
        }
        if starts_at <= self.clock.now() {
            return Err(CoreError::ValidationError("slot must start in the future".into()));
        }

        let slot = Slot::new(service.id, starts_at, capacity);
        self.slots.create_slot(&slot).await?;
        tracing::info!("Slot {} created for {} at {} (capacity {})", slot.id, slot.service_id, starts_at, capacity);
        Ok(slot)
    }

    /// Soft-retire: the slot stops being offered but keeps its booking history.
    pub async fn retire_slot(&self, id: Uuid) -> CoreResult<()> {
        if !self.slots.retire_slot(id).await? {
            return Err(CoreError::not_found("slot", id));
        }
        tracing::info!("Slot {} retired", id);
        Ok(())
    }
}
