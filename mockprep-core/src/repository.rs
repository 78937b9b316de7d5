use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BlogPost, Booking, BookingStatus, Cancellation, ContactMessage, Hold, HoldOutcome, HoldRequest, NewBooking,
    PaymentStatus, Service, Slot, Testimonial,
};
use crate::CoreResult;

/// Repository trait for the service catalog
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn list_services(&self) -> CoreResult<Vec<Service>>;

    async fn get_service(&self, id: &str) -> CoreResult<Option<Service>>;

    async fn upsert_service(&self, service: &Service) -> CoreResult<()>;
}

/// Repository trait for slot calendars. `held` is always computed from non-expired holds at `now`.
#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn create_slot(&self, slot: &Slot) -> CoreResult<()>;

    async fn get_slot(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Option<Slot>>;

    /// Non-retired slots of a service starting in `[from, to)`.
    async fn list_slots(
        &self,
        service_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Slot>>;

    /// Returns false when the slot does not exist.
    async fn retire_slot(&self, id: Uuid) -> CoreResult<bool>;
}

/// Repository trait for holds. Every method that touches slot counters runs under the slot's
/// serialization point.
#[async_trait]
pub trait HoldRepository: Send + Sync {
    /// Fails with `NotFound` (slot), `SlotFull`. A live hold for the same (slot, user) is returned
    /// as `HoldOutcome::Existing`.
    async fn create_hold(&self, request: HoldRequest, now: DateTime<Utc>) -> CoreResult<HoldOutcome>;

    async fn get_hold(&self, id: Uuid) -> CoreResult<Option<Hold>>;

    /// Removes the hold if present and returns it.
    async fn delete_hold(&self, id: Uuid) -> CoreResult<Option<Hold>>;

    /// Removes every hold with `expires_at <= now` and returns them.
    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<Vec<Hold>>;

    /// All-or-nothing: expiry check, hold removal, confirmed increment and booking insert.
    async fn convert_hold(&self, hold_id: Uuid, booking: NewBooking, now: DateTime<Utc>) -> CoreResult<Booking>;
}

/// Repository trait for the booking ledger
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    async fn list_bookings_for_user(&self, user_id: &str) -> CoreResult<Vec<Booking>>;

    async fn list_all_bookings(&self) -> CoreResult<Vec<Booking>>;

    /// One conditional write. Fails with `AlreadyCancelled` on a cancelled booking and with
    /// `InvalidTransition` when moving a paid booking off `paid`. Settling as paid also moves
    /// `pending_approval` to `upcoming`.
    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        transaction_id: Option<&str>,
    ) -> CoreResult<Booking>;

    /// Fails with `AlreadyCancelled` on a cancelled booking.
    async fn update_status(&self, id: Uuid, status: BookingStatus) -> CoreResult<Booking>;

    /// Releases the slot unit only when `now` is before the session start.
    async fn cancel_booking(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Cancellation>;
}

/// Repository trait for admin-managed content
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn save_message(&self, message: &ContactMessage) -> CoreResult<()>;

    async fn list_messages(&self) -> CoreResult<Vec<ContactMessage>>;

    async fn save_testimonial(&self, testimonial: &Testimonial) -> CoreResult<()>;

    async fn list_testimonials(&self) -> CoreResult<Vec<Testimonial>>;

    async fn save_blog_post(&self, post: &BlogPost) -> CoreResult<()>;

    async fn list_blog_posts(&self) -> CoreResult<Vec<BlogPost>>;

    async fn get_blog_post(&self, slug: &str) -> CoreResult<Option<BlogPost>>;
}
