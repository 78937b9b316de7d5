use chrono::Duration;
use mockprep_core::models::{Booking, BookingStatus, Cancellation, PaymentStatus};
use mockprep_core::notify::Notifier;
use mockprep_core::repository::BookingRepository;
use mockprep_core::{Clock, CoreError, CoreResult};
use mockprep_shared::models::events::{BookingCancelledEvent, BookingConfirmedEvent};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Admin dashboard figures.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BookingOverview {
    pub total: usize,
    pub pending_approval: usize,
    pub upcoming: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Minor units collected on paid, non-cancelled bookings.
    pub paid_revenue: i64,
    /// Minor units still owed by pay-later bookings.
    pub outstanding_pay_later: i64,
    pub sessions_next_7_days: usize,
}

/// Durable record of confirmed bookings and their admin-driven lifecycle.
#[derive(Clone)]
pub struct BookingLedger {
    repo: Arc<dyn BookingRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    pay_later_deadline: Duration,
}

impl BookingLedger {
    pub fn new(
        repo: Arc<dyn BookingRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        pay_later_deadline: Duration,
    ) -> Self {
        Self { repo, notifier, clock, pay_later_deadline }
    }

    pub async fn get_booking(&self, id: Uuid) -> CoreResult<Booking> {
        self.repo
            .get_booking(id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", id))
    }

    pub async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<Booking>> {
        self.repo.list_bookings_for_user(user_id).await
    }

    pub async fn list_all(&self) -> CoreResult<Vec<Booking>> {
        self.repo.list_all_bookings().await
    }

    /// Records a payment outcome. Settling a pay-later booking also approves it.
    pub async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        transaction_id: Option<&str>,
    ) -> CoreResult<Booking> {
        // Cancellation and the paid guard are checked in the same write
        let updated = self.repo.update_payment_status(id, status, transaction_id).await?;
        tracing::info!(
            "Booking {} payment status set to {} ({})",
            id, status.as_str(), updated.status.as_str()
        );
        Ok(updated)
    }

    /// Admin status changes. Cancellation goes through `cancel` instead.
    pub async fn update_status(&self, id: Uuid, status: BookingStatus) -> CoreResult<Booking> {
        let booking = self.get_booking(id).await?;
        if status == BookingStatus::Cancelled {
            return self.cancel(id, "admin").await.map(|c| c.booking);
        }
        if !booking.status.can_transition_to(status) {
            return Err(CoreError::InvalidTransition {
                from: booking.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        let updated = self.repo.update_status(id, status).await?;
        tracing::info!("Booking {} moved {} -> {}", id, booking.status.as_str(), status.as_str());
        Ok(updated)
    }

    /// Tells downstream systems a booking exists. Delivery failures never undo the booking.
    pub async fn announce_confirmed(&self, booking: &Booking) {
        let event = BookingConfirmedEvent {
            booking_id: booking.id,
            service_id: booking.service_id.clone(),
            slot_id: booking.slot_id,
            user_id: booking.user_id.clone(),
            payment_status: booking.payment_status.as_str().to_string(),
            meeting_link: booking.meeting_link.clone(),
            starts_at: booking.starts_at,
            timestamp: self.clock.now().timestamp(),
        };
        if let Err(e) = self.notifier.booking_confirmed(&event).await {
            tracing::warn!("Confirmation notice for booking {} not delivered: {}", booking.id, e);
        }
    }

    /// Cancels a booking. The slot unit comes back only if the session has not started.
    pub async fn cancel(&self, id: Uuid, reason: &str) -> CoreResult<Cancellation> {
        let now = self.clock.now();
        let cancellation = self.repo.cancel_booking(id, now).await?;
        tracing::info!(
            "Booking {} cancelled ({}), capacity released: {}",
            id, reason, cancellation.capacity_released
        );

        let event = BookingCancelledEvent {
            booking_id: id,
            slot_id: cancellation.booking.slot_id,
            capacity_released: cancellation.capacity_released,
            reason: reason.to_string(),
            timestamp: now.timestamp(),
        };
        if let Err(e) = self.notifier.booking_cancelled(&event).await {
            tracing::warn!("Cancellation notice for booking {} not delivered: {}", id, e);
        }
        Ok(cancellation)
    }

    /// Customer cancellation of their own booking.
    pub async fn cancel_for_user(&self, id: Uuid, user_id: &str) -> CoreResult<Cancellation> {
        let booking = self.get_booking(id).await?;
        if booking.user_id != user_id {
            return Err(CoreError::NotOwner(format!("booking {}", id)));
        }
        self.cancel(id, "customer").await
    }

    /// Cancels pay-later bookings still unpaid past their deadline, returning their units.
    pub async fn release_lapsed_pay_later(&self) -> CoreResult<Vec<Uuid>> {
        let now = self.clock.now();
        let lapsed: Vec<Uuid> = self
            .repo
            .list_all_bookings()
            .await?
            .into_iter()
            .filter(|b| {
                b.payment_status == PaymentStatus::PayLater
                    && b.status == BookingStatus::PendingApproval
                    && now >= b.starts_at - self.pay_later_deadline
            })
            .map(|b| b.id)
            .collect();

        let mut released = Vec::with_capacity(lapsed.len());
        for id in lapsed {
            match self.cancel(id, "pay_later_lapsed").await {
                Ok(_) => released.push(id),
                // Raced with another cancellation
                Err(CoreError::AlreadyCancelled(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(released)
    }

    pub async fn overview(&self) -> CoreResult<BookingOverview> {
        let now = self.clock.now();
        let week = now + Duration::days(7);
        let mut overview = BookingOverview::default();

        for booking in self.repo.list_all_bookings().await? {
            overview.total += 1;
            match booking.status {
                BookingStatus::PendingApproval => overview.pending_approval += 1,
                BookingStatus::Upcoming => overview.upcoming += 1,
                BookingStatus::Completed => overview.completed += 1,
                BookingStatus::Cancelled => {
                    overview.cancelled += 1;
                    continue;
                }
            }
            match booking.payment_status {
                PaymentStatus::Paid => overview.paid_revenue += booking.amount,
                PaymentStatus::PayLater | PaymentStatus::Pending => overview.outstanding_pay_later += booking.amount,
            }
            if booking.starts_at >= now && booking.starts_at < week {
                overview.sessions_next_7_days += 1;
            }
        }
        Ok(overview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockprep_core::memory::MemoryStore;
    use mockprep_core::models::{ContactDetails, HoldRequest, NewBooking, Slot};
    use mockprep_core::notify::LogNotifier;
    use mockprep_core::repository::{HoldRepository, SlotRepository};
    use mockprep_core::ManualClock;
    use mockprep_shared::Masked;

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: BookingLedger,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = BookingLedger::new(store.clone(), Arc::new(LogNotifier), clock.clone(), Duration::hours(24));
        Fixture { store, ledger, clock }
    }

    async fn book(f: &Fixture, user: &str, starts_in: Duration, payment: PaymentStatus) -> Booking {
        let slot = Slot::new("upsc-mock".into(), f.clock.now() + starts_in, 1);
        f.store.create_slot(&slot).await.unwrap();
        let hold = f
            .store
            .create_hold(
                HoldRequest { slot_id: slot.id, user_id: user.into(), ttl: Duration::minutes(15) },
                f.clock.now(),
            )
            .await
            .unwrap()
            .into_hold();
        let status = if payment == PaymentStatus::Paid {
            BookingStatus::Upcoming
        } else {
            BookingStatus::PendingApproval
        };
        let new = NewBooking {
            id: Uuid::new_v4(),
            service_id: "upsc-mock".into(),
            user_id: user.into(),
            contact: ContactDetails {
                name: "Meera".into(),
                email: Masked::new("meera@example.com".into()),
                phone: Masked::new("9123456789".into()),
                exam_applied: Some("SSB".into()),
                prior_attempts: Some(0),
            },
            amount: 200000,
            currency: "INR".into(),
            payment_status: payment,
            status,
            transaction_id: None,
            meeting_link: None,
        };
        f.store.convert_hold(hold.id, new, f.clock.now()).await.unwrap()
    }

    #[tokio::test]
    async fn test_status_transitions_are_validated() {
        let f = fixture().await;
        let booking = book(&f, "u1", Duration::days(3), PaymentStatus::PayLater).await;

        assert!(matches!(
            f.ledger.update_status(booking.id, BookingStatus::Completed).await,
            Err(CoreError::InvalidTransition { .. })
        ));
        let approved = f.ledger.update_status(booking.id, BookingStatus::Upcoming).await.unwrap();
        assert_eq!(approved.status, BookingStatus::Upcoming);
        let done = f.ledger.update_status(booking.id, BookingStatus::Completed).await.unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn test_settling_pay_later_approves() {
        let f = fixture().await;
        let booking = book(&f, "u1", Duration::days(3), PaymentStatus::PayLater).await;

        let paid = f
            .ledger
            .update_payment_status(booking.id, PaymentStatus::Paid, Some("txn_offline_9"))
            .await
            .unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.status, BookingStatus::Upcoming);
        assert_eq!(paid.transaction_id.as_deref(), Some("txn_offline_9"));

        assert!(f
            .ledger
            .update_payment_status(booking.id, PaymentStatus::Pending, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cancelled_booking_cannot_be_settled() {
        let f = fixture().await;
        let booking = book(&f, "u1", Duration::days(3), PaymentStatus::PayLater).await;
        f.ledger.cancel(booking.id, "admin").await.unwrap();

        assert!(matches!(
            f.ledger.update_payment_status(booking.id, PaymentStatus::Paid, Some("txn_after")).await,
            Err(CoreError::AlreadyCancelled(_))
        ));
        assert!(matches!(
            f.ledger.update_status(booking.id, BookingStatus::Upcoming).await,
            Err(CoreError::InvalidTransition { .. })
        ));
        let stored = f.ledger.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::PayLater);
        assert!(stored.transaction_id.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_start_releases_unit() {
        let f = fixture().await;
        let booking = book(&f, "u1", Duration::days(2), PaymentStatus::Paid).await;

        let cancellation = f.ledger.cancel_for_user(booking.id, "u1").await.unwrap();
        assert!(cancellation.capacity_released);
        let slot = f.store.get_slot(booking.slot_id, f.clock.now()).await.unwrap().unwrap();
        assert_eq!(slot.confirmed, 0);

        assert!(matches!(
            f.ledger.cancel(booking.id, "admin").await,
            Err(CoreError::AlreadyCancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_start_keeps_unit() {
        let f = fixture().await;
        let booking = book(&f, "u1", Duration::hours(1), PaymentStatus::Paid).await;

        f.clock.advance(Duration::hours(2));
        let cancellation = f.ledger.cancel(booking.id, "admin").await.unwrap();
        assert!(!cancellation.capacity_released);
        let slot = f.store.get_slot(booking.slot_id, f.clock.now()).await.unwrap().unwrap();
        assert_eq!(slot.confirmed, 1);
    }

    #[tokio::test]
    async fn test_customer_cannot_cancel_others_booking() {
        let f = fixture().await;
        let booking = book(&f, "u1", Duration::days(2), PaymentStatus::Paid).await;
        assert!(matches!(
            f.ledger.cancel_for_user(booking.id, "u2").await,
            Err(CoreError::NotOwner(_))
        ));
    }

    #[tokio::test]
    async fn test_lapsed_pay_later_is_released() {
        let f = fixture().await;
        let lapsing = book(&f, "u1", Duration::hours(30), PaymentStatus::PayLater).await;
        let safe = book(&f, "u2", Duration::days(5), PaymentStatus::PayLater).await;
        let paid = book(&f, "u3", Duration::hours(30), PaymentStatus::Paid).await;

        assert!(f.ledger.release_lapsed_pay_later().await.unwrap().is_empty());

        f.clock.advance(Duration::hours(7));
        let released = f.ledger.release_lapsed_pay_later().await.unwrap();
        assert_eq!(released, vec![lapsing.id]);

        assert!(f.ledger.get_booking(lapsing.id).await.unwrap().is_cancelled());
        assert!(!f.ledger.get_booking(safe.id).await.unwrap().is_cancelled());
        assert!(!f.ledger.get_booking(paid.id).await.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_overview_counts() {
        let f = fixture().await;
        book(&f, "u1", Duration::days(2), PaymentStatus::Paid).await;
        book(&f, "u2", Duration::days(10), PaymentStatus::PayLater).await;
        let cancelled = book(&f, "u3", Duration::days(3), PaymentStatus::Paid).await;
        f.ledger.cancel(cancelled.id, "admin").await.unwrap();

        let overview = f.ledger.overview().await.unwrap();
        assert_eq!(overview.total, 3);
        assert_eq!(overview.upcoming, 1);
        assert_eq!(overview.pending_approval, 1);
        assert_eq!(overview.cancelled, 1);
        assert_eq!(overview.paid_revenue, 200000);
        assert_eq!(overview.outstanding_pay_later, 200000);
        assert_eq!(overview.sessions_next_7_days, 1);
    }
}
