use async_trait::async_trait;
use mockprep_shared::models::events::{BookingCancelledEvent, BookingConfirmedEvent};

use crate::CoreResult;

/// Downstream notification system (emails, meeting invites). Delivery is its problem, not ours.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn booking_confirmed(&self, event: &BookingConfirmedEvent) -> CoreResult<()>;

    async fn booking_cancelled(&self, event: &BookingCancelledEvent) -> CoreResult<()>;
}

/// Writes events to the log only. Used when no broker is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn booking_confirmed(&self, event: &BookingConfirmedEvent) -> CoreResult<()> {
        tracing::info!(
            booking_id = %event.booking_id,
            slot_id = %event.slot_id,
            payment_status = %event.payment_status,
            "booking.confirmed"
        );
        Ok(())
    }

    async fn booking_cancelled(&self, event: &BookingCancelledEvent) -> CoreResult<()> {
        tracing::info!(
            booking_id = %event.booking_id,
            capacity_released = event.capacity_released,
            reason = %event.reason,
            "booking.cancelled"
        );
        Ok(())
    }
}
