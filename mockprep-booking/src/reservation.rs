use chrono::Duration;
use mockprep_core::models::{Booking, Hold, HoldOutcome, HoldRequest, NewBooking};
use mockprep_core::repository::{HoldRepository, SlotRepository};
use mockprep_core::{Clock, CoreError, CoreResult};
use mockprep_shared::models::events::SlotAvailabilityEvent;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::policy::DuplicateHoldPolicy;

const AVAILABILITY_CHANNEL_CAPACITY: usize = 256;

/// Owns hold lifecycle: create, expire, cancel, convert. Every capacity change is announced on the
/// availability channel.
#[derive(Clone)]
pub struct ReservationManager {
    holds: Arc<dyn HoldRepository>,
    slots: Arc<dyn SlotRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    duplicates: DuplicateHoldPolicy,
    availability: broadcast::Sender<SlotAvailabilityEvent>,
}

impl ReservationManager {
    pub fn new(
        holds: Arc<dyn HoldRepository>,
        slots: Arc<dyn SlotRepository>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        duplicates: DuplicateHoldPolicy,
    ) -> Self {
        let (availability, _) = broadcast::channel(AVAILABILITY_CHANNEL_CAPACITY);
        Self { holds, slots, clock, ttl, duplicates, availability }
    }

    /// Live feed of remaining-capacity changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SlotAvailabilityEvent> {
        self.availability.subscribe()
    }

    pub async fn create_hold(&self, slot_id: Uuid, user_id: &str) -> CoreResult<HoldOutcome> {
        let request = HoldRequest { slot_id, user_id: user_id.to_string(), ttl: self.ttl };
        let outcome = self.holds.create_hold(request, self.clock.now()).await?;

        match &outcome {
            HoldOutcome::Created(hold) => {
                tracing::info!("Hold {} placed on slot {} for {} until {}", hold.id, slot_id, user_id, hold.expires_at);
                self.announce(slot_id).await;
            }
            HoldOutcome::Existing(hold) => {
                if self.duplicates == DuplicateHoldPolicy::Reject {
                    return Err(CoreError::HoldAlreadyExists { slot_id, hold_id: hold.id });
                }
                tracing::debug!("Returning existing hold {} on slot {} for {}", hold.id, slot_id, user_id);
            }
        }
        Ok(outcome)
    }

    pub async fn get_hold(&self, hold_id: Uuid) -> CoreResult<Hold> {
        self.holds
            .get_hold(hold_id)
            .await?
            .ok_or_else(|| CoreError::not_found("hold", hold_id))
    }

    /// Releases a lapsed hold. A hold that is gone or still live is left alone.
    pub async fn expire_hold(&self, hold_id: Uuid) -> CoreResult<bool> {
        let Some(hold) = self.holds.get_hold(hold_id).await? else {
            return Ok(false);
        };
        if !hold.is_expired(self.clock.now()) {
            return Ok(false);
        }
        if self.holds.delete_hold(hold_id).await?.is_none() {
            return Ok(false);
        }

        tracing::info!("Hold {} on slot {} expired", hold_id, hold.slot_id);
        self.announce(hold.slot_id).await;
        Ok(true)
    }

    /// Voluntary release by the holder.
    pub async fn cancel_hold(&self, hold_id: Uuid, user_id: &str) -> CoreResult<()> {
        let hold = self.get_hold(hold_id).await?;
        if hold.user_id != user_id {
            return Err(CoreError::NotOwner(format!("hold {}", hold_id)));
        }
        if self.holds.delete_hold(hold_id).await?.is_some() {
            tracing::info!("Hold {} on slot {} released by {}", hold_id, hold.slot_id, user_id);
            self.announce(hold.slot_id).await;
        }
        Ok(())
    }

    /// Turns a live hold into a booking. Expiry is checked inside the same atomic step.
    pub async fn convert_hold(&self, hold_id: Uuid, booking: NewBooking) -> CoreResult<Booking> {
        let record = self.holds.convert_hold(hold_id, booking, self.clock.now()).await?;
        tracing::info!("Hold {} converted to booking {} on slot {}", hold_id, record.id, record.slot_id);
        self.announce(record.slot_id).await;
        Ok(record)
    }

    /// Drops every lapsed hold. Returns how many were released.
    pub async fn sweep(&self) -> CoreResult<usize> {
        let expired = self.holds.purge_expired(self.clock.now()).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let slots: HashSet<Uuid> = expired.iter().map(|h| h.slot_id).collect();
        for slot_id in slots {
            self.announce(slot_id).await;
        }
        tracing::info!("Sweep released {} expired holds", expired.len());
        Ok(expired.len())
    }

    /// Announces a slot's fresh remaining count after a change.
    pub async fn announce(&self, slot_id: Uuid) {
        let now = self.clock.now();
        match self.slots.get_slot(slot_id, now).await {
            Ok(Some(slot)) => {
                let event = SlotAvailabilityEvent {
                    service_id: slot.service_id.clone(),
                    slot_id,
                    remaining: if slot.retired { 0 } else { slot.remaining() },
                    timestamp: now.timestamp(),
                };
                // No subscribers is fine
                let _ = self.availability.send(event);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not read slot {} for availability update: {}", slot_id, e),
        }
    }
}
