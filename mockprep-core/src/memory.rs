//! In-memory implementation of every repository trait.
//!
//! All state sits behind one async mutex, so each operation is serialized against every other,
//! which is a (coarse) per-slot serialization point. Used for development mode and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    BlogPost, Booking, BookingStatus, Cancellation, ContactMessage, Hold, HoldOutcome, HoldRequest, NewBooking,
    PaymentStatus, Service, Slot, Testimonial,
};
use crate::repository::{BookingRepository, CatalogRepository, ContentRepository, HoldRepository, SlotRepository};
use crate::{CoreError, CoreResult};

#[derive(Default)]
struct MemoryState {
    services: HashMap<String, Service>,
    slots: HashMap<Uuid, Slot>,
    holds: HashMap<Uuid, Hold>,
    bookings: HashMap<Uuid, Booking>,
    messages: Vec<ContactMessage>,
    testimonials: Vec<Testimonial>,
    posts: Vec<BlogPost>,
}

impl MemoryState {
    fn held_count(&self, slot_id: Uuid, now: DateTime<Utc>) -> u32 {
        self.holds
            .values()
            .filter(|h| h.slot_id == slot_id && !h.is_expired(now))
            .count() as u32
    }

    fn slot_view(&self, slot: &Slot, now: DateTime<Utc>) -> Slot {
        let mut view = slot.clone();
        view.held = self.held_count(slot.id, now);
        view
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_services(services: Vec<Service>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().await;
            for service in services {
                state.services.insert(service.id.clone(), service);
            }
        }
        store
    }

    /// Number of hold records physically present, expired or not.
    pub async fn hold_count(&self) -> usize {
        self.state.lock().await.holds.len()
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn list_services(&self) -> CoreResult<Vec<Service>> {
        Ok(self.state.lock().await.services.values().cloned().collect())
    }

    async fn get_service(&self, id: &str) -> CoreResult<Option<Service>> {
        Ok(self.state.lock().await.services.get(id).cloned())
    }

    async fn upsert_service(&self, service: &Service) -> CoreResult<()> {
        self.state.lock().await.services.insert(service.id.clone(), service.clone());
        Ok(())
    }
}

#[async_trait]
impl SlotRepository for MemoryStore {
    async fn create_slot(&self, slot: &Slot) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let mut record = slot.clone();
        record.held = 0;
        state.slots.insert(record.id, record);
        Ok(())
    }

    async fn get_slot(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Option<Slot>> {
        let state = self.state.lock().await;
        Ok(state.slots.get(&id).map(|slot| state.slot_view(slot, now)))
    }

    async fn list_slots(
        &self,
        service_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Slot>> {
        let state = self.state.lock().await;
        let mut slots: Vec<Slot> = state
            .slots
            .values()
            .filter(|s| s.service_id == service_id && !s.retired && s.starts_at >= from && s.starts_at < to)
            .map(|s| state.slot_view(s, now))
            .collect();
        slots.sort_by_key(|s| s.starts_at);
        Ok(slots)
    }

    async fn retire_slot(&self, id: Uuid) -> CoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.slots.get_mut(&id) {
            Some(slot) => {
                slot.retired = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl HoldRepository for MemoryStore {
    async fn create_hold(&self, request: HoldRequest, now: DateTime<Utc>) -> CoreResult<HoldOutcome> {
        let mut state = self.state.lock().await;

        let slot = state
            .slots
            .get(&request.slot_id)
            .filter(|s| !s.retired)
            .cloned()
            .ok_or_else(|| CoreError::not_found("slot", request.slot_id))?;

        if slot.starts_at <= now {
            return Err(CoreError::ValidationError(format!("slot {} has already started", slot.id)));
        }

        // Lazy expiry for this slot
        state.holds.retain(|_, h| !(h.slot_id == slot.id && h.is_expired(now)));

        if let Some(existing) = state
            .holds
            .values()
            .find(|h| h.slot_id == slot.id && h.user_id == request.user_id)
        {
            return Ok(HoldOutcome::Existing(existing.clone()));
        }

        let held = state.held_count(slot.id, now);
        if held + slot.confirmed >= slot.capacity {
            return Err(CoreError::SlotFull(slot.id));
        }

        let hold = Hold::new(slot.id, request.user_id, now, request.ttl);
        state.holds.insert(hold.id, hold.clone());
        Ok(HoldOutcome::Created(hold))
    }

    async fn get_hold(&self, id: Uuid) -> CoreResult<Option<Hold>> {
        Ok(self.state.lock().await.holds.get(&id).cloned())
    }

    async fn delete_hold(&self, id: Uuid) -> CoreResult<Option<Hold>> {
        Ok(self.state.lock().await.holds.remove(&id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<Vec<Hold>> {
        let mut state = self.state.lock().await;
        let expired: Vec<Uuid> = state
            .holds
            .values()
            .filter(|h| h.is_expired(now))
            .map(|h| h.id)
            .collect();
        Ok(expired.into_iter().filter_map(|id| state.holds.remove(&id)).collect())
    }

    async fn convert_hold(&self, hold_id: Uuid, booking: NewBooking, now: DateTime<Utc>) -> CoreResult<Booking> {
        let mut state = self.state.lock().await;

        let hold = state
            .holds
            .get(&hold_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("hold", hold_id))?;

        if hold.is_expired(now) {
            state.holds.remove(&hold_id);
            return Err(CoreError::HoldExpired(hold_id));
        }

        let held = state.held_count(hold.slot_id, now);
        let slot = state
            .slots
            .get_mut(&hold.slot_id)
            .ok_or_else(|| CoreError::not_found("slot", hold.slot_id))?;

        // The hold being converted is part of `held`, so this is the pre-commit invariant.
        if held + slot.confirmed > slot.capacity {
            tracing::error!(
                "Slot {} counters inconsistent before conversion: held={} confirmed={} capacity={}",
                slot.id, held, slot.confirmed, slot.capacity
            );
            return Err(CoreError::InvariantViolation(format!(
                "slot {} has held={} confirmed={} capacity={}",
                slot.id, held, slot.confirmed, slot.capacity
            )));
        }

        slot.confirmed += 1;
        let record = Booking::from_new(booking, slot, now);
        state.holds.remove(&hold_id);
        state.bookings.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self.state.lock().await.bookings.get(&id).cloned())
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> CoreResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state.bookings.values().filter(|b| b.user_id == user_id).cloned().collect();
        bookings.sort_by_key(|b| std::cmp::Reverse(b.created_at));
        Ok(bookings)
    }

    async fn list_all_bookings(&self) -> CoreResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state.bookings.values().cloned().collect();
        bookings.sort_by_key(|b| std::cmp::Reverse(b.created_at));
        Ok(bookings)
    }

    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        transaction_id: Option<&str>,
    ) -> CoreResult<Booking> {
        let mut state = self.state.lock().await;
        let booking = state.bookings.get_mut(&id).ok_or_else(|| CoreError::not_found("booking", id))?;
        if booking.is_cancelled() {
            return Err(CoreError::AlreadyCancelled(id));
        }
        if booking.payment_status == PaymentStatus::Paid && status != PaymentStatus::Paid {
            return Err(CoreError::InvalidTransition {
                from: booking.payment_status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        booking.payment_status = status;
        if let Some(tx) = transaction_id {
            booking.transaction_id = Some(tx.to_string());
        }
        if status == PaymentStatus::Paid && booking.status == BookingStatus::PendingApproval {
            booking.status = BookingStatus::Upcoming;
        }
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn update_status(&self, id: Uuid, status: BookingStatus) -> CoreResult<Booking> {
        let mut state = self.state.lock().await;
        let booking = state.bookings.get_mut(&id).ok_or_else(|| CoreError::not_found("booking", id))?;
        if booking.is_cancelled() {
            return Err(CoreError::AlreadyCancelled(id));
        }
        booking.status = status;
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn cancel_booking(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Cancellation> {
        let mut state = self.state.lock().await;

        let booking = state.bookings.get(&id).cloned().ok_or_else(|| CoreError::not_found("booking", id))?;
        if booking.is_cancelled() {
            return Err(CoreError::AlreadyCancelled(id));
        }

        let release = now < booking.starts_at;
        if release {
            let slot = state
                .slots
                .get_mut(&booking.slot_id)
                .ok_or_else(|| CoreError::not_found("slot", booking.slot_id))?;
            if slot.confirmed == 0 {
                tracing::error!("Slot {} has no confirmed unit to release for booking {}", slot.id, id);
                return Err(CoreError::InvariantViolation(format!(
                    "slot {} confirmed count is zero while booking {} is active",
                    slot.id, id
                )));
            }
            slot.confirmed -= 1;
        }

        let record = state.bookings.get_mut(&id).ok_or_else(|| CoreError::not_found("booking", id))?;
        record.status = BookingStatus::Cancelled;
        record.cancelled_at = Some(now);
        record.capacity_released = release;
        record.updated_at = now;

        Ok(Cancellation { booking: record.clone(), capacity_released: release })
    }
}

#[async_trait]
impl ContentRepository for MemoryStore {
    async fn save_message(&self, message: &ContactMessage) -> CoreResult<()> {
        self.state.lock().await.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self) -> CoreResult<Vec<ContactMessage>> {
        let mut messages = self.state.lock().await.messages.clone();
        messages.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        Ok(messages)
    }

    async fn save_testimonial(&self, testimonial: &Testimonial) -> CoreResult<()> {
        self.state.lock().await.testimonials.push(testimonial.clone());
        Ok(())
    }

    async fn list_testimonials(&self) -> CoreResult<Vec<Testimonial>> {
        let mut testimonials = self.state.lock().await.testimonials.clone();
        testimonials.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(testimonials)
    }

    async fn save_blog_post(&self, post: &BlogPost) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        state.posts.retain(|p| p.slug != post.slug);
        state.posts.push(post.clone());
        Ok(())
    }

    async fn list_blog_posts(&self) -> CoreResult<Vec<BlogPost>> {
        let mut posts = self.state.lock().await.posts.clone();
        posts.sort_by_key(|p| std::cmp::Reverse(p.published_at));
        Ok(posts)
    }

    async fn get_blog_post(&self, slug: &str) -> CoreResult<Option<BlogPost>> {
        Ok(self.state.lock().await.posts.iter().find(|p| p.slug == slug).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContactDetails;
    use chrono::Duration;
    use mockprep_shared::pii::Masked;
    use std::sync::Arc;

    fn new_booking(user: &str) -> NewBooking {
        NewBooking {
            id: Uuid::new_v4(),
            service_id: "upsc-mock".into(),
            user_id: user.into(),
            contact: ContactDetails {
                name: "Asha".into(),
                email: Masked::new("asha@example.com".into()),
                phone: Masked::new("9876543210".into()),
                exam_applied: None,
                prior_attempts: Some(0),
            },
            amount: 150000,
            currency: "INR".into(),
            payment_status: PaymentStatus::Paid,
            status: BookingStatus::Upcoming,
            transaction_id: Some("txn_1".into()),
            meeting_link: None,
        }
    }

    async fn store_with_slot(capacity: u32, now: DateTime<Utc>) -> (MemoryStore, Slot) {
        let store = MemoryStore::new();
        let slot = Slot::new("upsc-mock".into(), now + Duration::days(2), capacity);
        store.create_slot(&slot).await.unwrap();
        (store, slot)
    }

    fn request(slot: &Slot, user: &str) -> HoldRequest {
        HoldRequest { slot_id: slot.id, user_id: user.into(), ttl: Duration::minutes(15) }
    }

    #[tokio::test]
    async fn test_hold_counts_and_slot_full() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(2, now).await;

        store.create_hold(request(&slot, "a"), now).await.unwrap();
        store.create_hold(request(&slot, "b"), now).await.unwrap();
        let err = store.create_hold(request(&slot, "c"), now).await.unwrap_err();
        assert!(matches!(err, CoreError::SlotFull(_)));

        let view = store.get_slot(slot.id, now).await.unwrap().unwrap();
        assert_eq!(view.held, 2);
        assert_eq!(view.remaining(), 0);
    }

    #[tokio::test]
    async fn test_same_user_gets_existing_hold() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(3, now).await;

        let first = store.create_hold(request(&slot, "a"), now).await.unwrap();
        let second = store.create_hold(request(&slot, "a"), now + Duration::minutes(1)).await.unwrap();
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.hold().id, second.hold().id);
        assert_eq!(store.hold_count().await, 1);
    }

    #[tokio::test]
    async fn test_expired_unit_is_free_for_next_caller() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(1, now).await;

        store.create_hold(request(&slot, "a"), now).await.unwrap();
        let later = now + Duration::minutes(16);
        let outcome = store.create_hold(request(&slot, "b"), later).await.unwrap();
        assert_eq!(outcome.hold().user_id, "b");
        assert_eq!(store.hold_count().await, 1);
    }

    #[tokio::test]
    async fn test_convert_is_atomic_with_counters() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(1, now).await;
        let hold = store.create_hold(request(&slot, "a"), now).await.unwrap().into_hold();

        let booking = store.convert_hold(hold.id, new_booking("a"), now).await.unwrap();
        assert_eq!(booking.slot_id, slot.id);
        assert_eq!(booking.starts_at, slot.starts_at);

        let view = store.get_slot(slot.id, now).await.unwrap().unwrap();
        assert_eq!((view.held, view.confirmed), (0, 1));
        assert!(store.get_hold(hold.id).await.unwrap().is_none());

        let again = store.convert_hold(hold.id, new_booking("a"), now).await.unwrap_err();
        assert!(matches!(again, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_expired_hold_cannot_convert() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(1, now).await;
        let hold = store.create_hold(request(&slot, "a"), now).await.unwrap().into_hold();

        let err = store
            .convert_hold(hold.id, new_booking("a"), now + Duration::minutes(15))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::HoldExpired(_)));
        assert!(store.list_all_bookings().await.unwrap().is_empty());

        let view = store.get_slot(slot.id, now).await.unwrap().unwrap();
        assert_eq!(view.confirmed, 0);
    }

    #[tokio::test]
    async fn test_cancel_before_and_after_start() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(2, now).await;

        let h1 = store.create_hold(request(&slot, "a"), now).await.unwrap().into_hold();
        let h2 = store.create_hold(request(&slot, "b"), now).await.unwrap().into_hold();
        let b1 = store.convert_hold(h1.id, new_booking("a"), now).await.unwrap();
        let b2 = store.convert_hold(h2.id, new_booking("b"), now).await.unwrap();

        let early = store.cancel_booking(b1.id, now).await.unwrap();
        assert!(early.capacity_released);
        assert_eq!(store.get_slot(slot.id, now).await.unwrap().unwrap().confirmed, 1);

        let after_start = slot.starts_at + Duration::hours(1);
        let late = store.cancel_booking(b2.id, after_start).await.unwrap();
        assert!(!late.capacity_released);
        assert_eq!(store.get_slot(slot.id, now).await.unwrap().unwrap().confirmed, 1);

        let err = store.cancel_booking(b1.id, now).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyCancelled(_)));
    }

    #[tokio::test]
    async fn test_concurrent_holds_never_overbook() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(3, now).await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let req = request(&slot, &format!("user-{}", i));
            handles.push(tokio::spawn(async move { store.create_hold(req, now).await }));
        }

        let mut created = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(CoreError::SlotFull(_)) => full += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(created, 3);
        assert_eq!(full, 17);

        let view = store.get_slot(slot.id, now).await.unwrap().unwrap();
        assert!(view.check_invariant().is_ok());
    }

    #[tokio::test]
    async fn test_conversions_racing_new_holds_never_overbook() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(4, now).await;
        let store = Arc::new(store);

        let mut held = Vec::new();
        for user in ["a", "b"] {
            held.push(store.create_hold(request(&slot, user), now).await.unwrap().into_hold());
        }

        let mut conversions = Vec::new();
        let mut attempts = Vec::new();
        for (i, hold) in held.into_iter().enumerate() {
            let converter = store.clone();
            let booking = new_booking(&hold.user_id);
            conversions.push(tokio::spawn(async move { converter.convert_hold(hold.id, booking, now).await }));

            for j in 0..6 {
                let holder = store.clone();
                let req = request(&slot, &format!("late-{}-{}", i, j));
                attempts.push(tokio::spawn(async move { holder.create_hold(req, now).await }));
            }
        }

        for handle in conversions {
            assert!(handle.await.unwrap().is_ok());
        }
        let mut created = 0;
        for handle in attempts {
            match handle.await.unwrap() {
                Ok(outcome) => {
                    assert!(outcome.is_new());
                    created += 1;
                }
                Err(CoreError::SlotFull(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(created, 2);

        let view = store.get_slot(slot.id, now).await.unwrap().unwrap();
        assert!(view.check_invariant().is_ok());
        assert_eq!(view.confirmed, 2);
        assert!(view.confirmed <= view.capacity);
        assert_eq!(view.held + view.confirmed, view.capacity);
    }

    #[tokio::test]
    async fn test_payment_update_refuses_cancelled_booking() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(1, now).await;
        let hold = store.create_hold(request(&slot, "a"), now).await.unwrap().into_hold();
        let mut pay_later = new_booking("a");
        pay_later.payment_status = PaymentStatus::PayLater;
        pay_later.status = BookingStatus::PendingApproval;
        let booking = store.convert_hold(hold.id, pay_later, now).await.unwrap();

        store.cancel_booking(booking.id, now).await.unwrap();
        let err = store
            .update_payment_status(booking.id, PaymentStatus::Paid, Some("txn_late"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyCancelled(_)));
        let err = store.update_status(booking.id, BookingStatus::Upcoming).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyCancelled(_)));

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::PayLater);
    }

    #[tokio::test]
    async fn test_settle_racing_cancel_is_applied_atomically() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());

        for round in 0..10 {
            let slot = Slot::new("upsc-mock".into(), now + Duration::days(2), 1);
            store.create_slot(&slot).await.unwrap();
            let user = format!("u{}", round);
            let hold = store.create_hold(request(&slot, &user), now).await.unwrap().into_hold();
            let mut pay_later = new_booking(&user);
            pay_later.payment_status = PaymentStatus::PayLater;
            pay_later.status = BookingStatus::PendingApproval;
            let id = store.convert_hold(hold.id, pay_later, now).await.unwrap().id;

            let settle = {
                let store = store.clone();
                tokio::spawn(async move { store.update_payment_status(id, PaymentStatus::Paid, Some("txn")).await })
            };
            let cancel = {
                let store = store.clone();
                tokio::spawn(async move { store.cancel_booking(id, now).await })
            };
            let settled = settle.await.unwrap();
            let cancelled = cancel.await.unwrap();

            let stored = store.get_booking(id).await.unwrap().unwrap();
            assert!(cancelled.is_ok());
            assert!(stored.is_cancelled());
            match settled {
                // Settled first: promoted in the same write, then cancelled
                Ok(paid) => assert_eq!(paid.status, BookingStatus::Upcoming),
                Err(e) => {
                    assert!(matches!(e, CoreError::AlreadyCancelled(_)));
                    assert_eq!(stored.payment_status, PaymentStatus::PayLater);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_retired_slot_is_hidden_and_unholdable() {
        let now = Utc::now();
        let (store, slot) = store_with_slot(1, now).await;
        assert!(store.retire_slot(slot.id).await.unwrap());

        let listed = store
            .list_slots("upsc-mock", now, now + Duration::days(7), now)
            .await
            .unwrap();
        assert!(listed.is_empty());

        let err = store.create_hold(request(&slot, "a"), now).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert!(!store.retire_slot(Uuid::new_v4()).await.unwrap());
    }
}
