use chrono::{DateTime, Duration, Utc};
use mockprep_catalog::{AvailabilityStore, Catalog};
use mockprep_core::models::{Booking, BookingStatus, Hold, HoldOutcome, NewBooking, PaymentStatus};
use mockprep_core::payment::{PaymentAdapter, SignedPayment};
use mockprep_core::{Clock, CoreError, CoreResult};
use std::sync::Arc;
use uuid::Uuid;

use crate::flow::{BookingFlow, FlowStage, FlowStore};
use crate::ledger::BookingLedger;
use crate::policy::BookingPolicy;
use crate::reservation::ReservationManager;
use crate::validation::{validate_details, DetailsInput};

/// Drives a booking from service selection to a confirmed booking. The server owns every
/// transition; clients only ever see the resulting flow.
#[derive(Clone)]
pub struct BookingOrchestrator {
    catalog: Catalog,
    availability: AvailabilityStore,
    reservations: ReservationManager,
    ledger: BookingLedger,
    payments: Arc<dyn PaymentAdapter>,
    flows: Arc<dyn FlowStore>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl BookingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Catalog,
        availability: AvailabilityStore,
        reservations: ReservationManager,
        ledger: BookingLedger,
        payments: Arc<dyn PaymentAdapter>,
        flows: Arc<dyn FlowStore>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self { catalog, availability, reservations, ledger, payments, flows, clock, policy }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn availability(&self) -> &AvailabilityStore {
        &self.availability
    }

    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    pub fn ledger(&self) -> &BookingLedger {
        &self.ledger
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    // ============================================================================
    // Steps
    // ============================================================================

    /// ServiceSelected
    pub async fn start(&self, user_id: &str, service_id: &str) -> CoreResult<BookingFlow> {
        let service = self.catalog.get_bookable(service_id).await?;
        let flow = BookingFlow::new(user_id.to_string(), &service, &self.policy.currency, self.clock.now());
        self.save(&flow).await?;
        tracing::info!("Flow {} started by {} for {}", flow.id, user_id, service_id);
        Ok(flow)
    }

    /// Current view of a flow. A lapsed hold is expired here, before the caller sees it.
    pub async fn get(&self, flow_id: Uuid, user_id: &str) -> CoreResult<BookingFlow> {
        let flow = self.load(flow_id).await?;
        flow.ensure_owner(user_id)?;
        self.refresh(flow).await
    }

    /// ServiceSelected | SlotHeld -> SlotHeld. Picking another slot releases the previous hold.
    pub async fn hold_slot(&self, flow_id: Uuid, user_id: &str, slot_id: Uuid) -> CoreResult<BookingFlow> {
        let mut flow = self.get(flow_id, user_id).await?;
        flow.ensure_stage(&[FlowStage::ServiceSelected, FlowStage::SlotHeld], FlowStage::SlotHeld)?;

        if flow.hold.as_ref().is_some_and(|h| h.slot_id == slot_id) {
            return Ok(flow);
        }

        let slot = self.availability.get_slot(slot_id).await?;
        if slot.service_id != flow.service_id {
            return Err(CoreError::ValidationError(format!(
                "slot {} does not belong to service '{}'",
                slot_id, flow.service_id
            )));
        }

        // A flow owns its hold outright. The user's live hold on this slot belongs to another
        // flow, so it is neither shared nor taken over.
        let hold = match self.reservations.create_hold(slot_id, user_id).await? {
            HoldOutcome::Created(hold) => hold,
            HoldOutcome::Existing(hold) => {
                tracing::info!(
                    "Flow {} refused hold {} on slot {}: held by another flow of {}",
                    flow.id, hold.id, slot_id, user_id
                );
                return Err(CoreError::HoldAlreadyExists { slot_id, hold_id: hold.id });
            }
        };
        let previous = flow.hold.replace(hold.clone());

        flow.last_error = None;
        flow.advance(FlowStage::SlotHeld, self.clock.now());
        if let Err(e) = self.save(&flow).await {
            self.release_hold(&hold).await;
            return Err(e);
        }
        if let Some(previous) = previous {
            self.release_hold(&previous).await;
        }
        Ok(flow)
    }

    /// SlotHeld | DetailsCollected -> DetailsCollected
    pub async fn submit_details(&self, flow_id: Uuid, user_id: &str, input: DetailsInput) -> CoreResult<BookingFlow> {
        let mut flow = self.get(flow_id, user_id).await?;
        flow.ensure_stage(
            &[FlowStage::SlotHeld, FlowStage::DetailsCollected],
            FlowStage::DetailsCollected,
        )?;

        flow.details = Some(validate_details(input)?);
        flow.advance(FlowStage::DetailsCollected, self.clock.now());
        self.save(&flow).await?;
        Ok(flow)
    }

    /// DetailsCollected -> PaymentPending. Asking again while pending returns the same intent.
    pub async fn begin_payment(&self, flow_id: Uuid, user_id: &str) -> CoreResult<BookingFlow> {
        let mut flow = self.get(flow_id, user_id).await?;
        flow.ensure_stage(
            &[FlowStage::DetailsCollected, FlowStage::PaymentPending],
            FlowStage::PaymentPending,
        )?;
        if flow.stage == FlowStage::PaymentPending && flow.intent.is_some() {
            return Ok(flow);
        }

        let intent = match self.payments.create_intent(flow.amount, &flow.currency, flow.id).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!("Payment intent for flow {} failed: {}", flow.id, e);
                flow.last_error = Some(e.to_string());
                self.save(&flow).await?;
                return Err(e);
            }
        };

        tracing::info!("Flow {} awaiting payment on intent {}", flow.id, intent.id);
        flow.intent = Some(intent);
        flow.last_error = None;
        flow.advance(FlowStage::PaymentPending, self.clock.now());
        self.save(&flow).await?;
        Ok(flow)
    }

    /// PaymentPending -> Confirmed, driven by the gateway's signed confirmation.
    ///
    /// Replays of an already applied confirmation return the existing booking. Declines count
    /// against the attempt budget; forged or mismatched confirmations do not.
    pub async fn confirm_payment(&self, payload: &SignedPayment) -> CoreResult<Booking> {
        let flow = self.load(payload.reference_id).await?;
        if flow.stage == FlowStage::Confirmed {
            return self.replay_confirmation(flow, payload).await;
        }

        let mut flow = self.refresh(flow).await?;
        if flow.stage.is_terminal() && issued_intent(&flow, payload) {
            self.flag_unapplied_capture(&mut flow, payload).await?;
        }
        flow.ensure_stage(&[FlowStage::PaymentPending], FlowStage::Confirmed)?;

        // 1. The confirmation must be for the intent we issued
        if !issued_intent(&flow, payload) {
            tracing::warn!(
                "Confirmation for flow {} names intent {} which was not issued for it",
                flow.id, payload.intent_id
            );
            return Err(CoreError::InvalidSignature);
        }

        // 2. Signature and outcome
        let result = match self.payments.verify_payment(payload).await {
            Ok(result) => result,
            Err(CoreError::InvalidSignature) => return Err(CoreError::InvalidSignature),
            Err(e) if e.is_retryable_payment_failure() => return Err(self.record_failed_attempt(flow, e).await?),
            Err(e) => return Err(e),
        };

        // 3. Convert the hold
        let booking_id = Uuid::new_v4();
        let new = self.new_booking(&flow, booking_id, PaymentStatus::Paid, Some(result.transaction_id))?;
        let hold_id = self.live_hold(&flow)?.id;

        let booking = match self.reservations.convert_hold(hold_id, new).await {
            Ok(booking) => booking,
            Err(CoreError::HoldExpired(id)) => {
                tracing::warn!(
                    "Payment {} captured for flow {} after its hold lapsed; refund required",
                    payload.transaction_id, flow.id
                );
                flow.mark_expired(self.clock.now());
                flow.last_error = Some(refund_required(&payload.transaction_id));
                self.save(&flow).await?;
                return Err(CoreError::HoldExpired(id));
            }
            Err(e @ CoreError::NotFound { .. }) => {
                // A concurrent delivery of the same confirmation may have converted the hold
                if let Some(current) = self.flows.load(flow.id).await? {
                    if current.stage == FlowStage::Confirmed {
                        return self.replay_confirmation(current, payload).await;
                    }
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // 4. Record and announce
        self.finish(flow, &booking, PaymentStatus::Paid).await?;
        Ok(booking)
    }

    /// DetailsCollected | PaymentPending -> Confirmed without collecting payment.
    pub async fn choose_pay_later(&self, flow_id: Uuid, user_id: &str) -> CoreResult<Booking> {
        let mut flow = self.get(flow_id, user_id).await?;
        flow.ensure_stage(
            &[FlowStage::DetailsCollected, FlowStage::PaymentPending],
            FlowStage::Confirmed,
        )?;

        let booking_id = Uuid::new_v4();
        let new = self.new_booking(&flow, booking_id, PaymentStatus::PayLater, None)?;
        let hold_id = self.live_hold(&flow)?.id;

        let booking = match self.reservations.convert_hold(hold_id, new).await {
            Ok(booking) => booking,
            Err(CoreError::HoldExpired(id)) => {
                flow.mark_expired(self.clock.now());
                self.save(&flow).await?;
                return Err(CoreError::HoldExpired(id));
            }
            Err(e) => return Err(e),
        };

        self.finish(flow, &booking, PaymentStatus::PayLater).await?;
        Ok(booking)
    }

    /// Abandons a flow and frees its hold. Cancelling twice is a no-op.
    pub async fn cancel(&self, flow_id: Uuid, user_id: &str) -> CoreResult<BookingFlow> {
        let mut flow = self.get(flow_id, user_id).await?;
        if flow.stage == FlowStage::Cancelled {
            return Ok(flow);
        }
        flow.ensure_stage(
            &[
                FlowStage::ServiceSelected,
                FlowStage::SlotHeld,
                FlowStage::DetailsCollected,
                FlowStage::PaymentPending,
            ],
            FlowStage::Cancelled,
        )?;

        if let Some(hold) = &flow.hold {
            self.release_hold(hold).await;
        }
        flow.details = None;
        flow.advance(FlowStage::Cancelled, self.clock.now());
        self.save(&flow).await?;
        tracing::info!("Flow {} cancelled by {}", flow.id, user_id);
        Ok(flow)
    }

    // ============================================================================
    // Helpers
    // ============================================================================

    async fn load(&self, flow_id: Uuid) -> CoreResult<BookingFlow> {
        self.flows
            .load(flow_id)
            .await?
            .ok_or_else(|| CoreError::not_found("flow", flow_id))
    }

    async fn save(&self, flow: &BookingFlow) -> CoreResult<()> {
        self.flows.save(flow, self.flow_ttl(flow, self.clock.now())).await
    }

    /// Retention counts from the later of now and the hold's expiry.
    fn flow_ttl(&self, flow: &BookingFlow, now: DateTime<Utc>) -> Duration {
        match flow.expires_at() {
            Some(expires_at) if expires_at > now => (expires_at - now) + self.policy.flow_retention,
            _ => self.policy.flow_retention,
        }
    }

    async fn refresh(&self, mut flow: BookingFlow) -> CoreResult<BookingFlow> {
        let now = self.clock.now();
        if !flow.hold_lapsed(now) {
            return Ok(flow);
        }

        if let Some(hold) = &flow.hold {
            self.reservations.expire_hold(hold.id).await?;
        }
        flow.mark_expired(now);
        self.save(&flow).await?;
        tracing::info!("Flow {} expired with its hold", flow.id);
        Ok(flow)
    }

    fn live_hold<'a>(&self, flow: &'a BookingFlow) -> CoreResult<&'a Hold> {
        flow.hold
            .as_ref()
            .ok_or_else(|| CoreError::InvariantViolation(format!("flow {} reached payment without a hold", flow.id)))
    }

    fn new_booking(
        &self,
        flow: &BookingFlow,
        booking_id: Uuid,
        payment_status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> CoreResult<NewBooking> {
        let contact = flow
            .details
            .clone()
            .ok_or_else(|| CoreError::InvariantViolation(format!("flow {} has no contact details", flow.id)))?;
        let status = match payment_status {
            PaymentStatus::Paid => BookingStatus::Upcoming,
            PaymentStatus::PayLater | PaymentStatus::Pending => BookingStatus::PendingApproval,
        };

        Ok(NewBooking {
            id: booking_id,
            service_id: flow.service_id.clone(),
            user_id: flow.user_id.clone(),
            contact,
            amount: flow.amount,
            currency: flow.currency.clone(),
            payment_status,
            status,
            transaction_id,
            meeting_link: Some(self.policy.meeting_link(booking_id)),
        })
    }

    async fn finish(&self, mut flow: BookingFlow, booking: &Booking, payment_status: PaymentStatus) -> CoreResult<()> {
        flow.booking_id = Some(booking.id);
        flow.payment_status = Some(payment_status);
        flow.last_error = None;
        flow.advance(FlowStage::Confirmed, self.clock.now());
        self.save(&flow).await?;

        tracing::info!(
            "Flow {} confirmed as booking {} ({})",
            flow.id, booking.id, payment_status.as_str()
        );
        self.ledger.announce_confirmed(booking).await;
        Ok(())
    }

    /// Counts a decline. Returns the error to surface: the original while attempts remain,
    /// `PaymentAttemptsExhausted` once the hold has been given up.
    async fn record_failed_attempt(&self, mut flow: BookingFlow, error: CoreError) -> CoreResult<CoreError> {
        flow.payment_attempts += 1;
        flow.last_error = Some(error.to_string());
        tracing::warn!(
            "Payment attempt {}/{} for flow {} failed: {}",
            flow.payment_attempts, self.policy.max_payment_attempts, flow.id, error
        );

        if flow.payment_attempts < self.policy.max_payment_attempts {
            self.save(&flow).await?;
            return Ok(error);
        }

        if let Some(hold) = &flow.hold {
            self.release_hold(hold).await;
        }
        flow.advance(FlowStage::PaymentFailed, self.clock.now());
        self.save(&flow).await?;
        Ok(CoreError::PaymentAttemptsExhausted(flow.id))
    }

    /// A confirmation for a flow that already has its booking. Replays of the applied capture
    /// return the booking; a capture that lands after the customer chose to pay later settles it.
    async fn replay_confirmation(&self, mut flow: BookingFlow, payload: &SignedPayment) -> CoreResult<Booking> {
        if !issued_intent(&flow, payload) {
            return Err(CoreError::InvalidSignature);
        }
        let result = self.payments.verify_payment(payload).await?;

        let booking_id = flow
            .booking_id
            .ok_or_else(|| CoreError::InvariantViolation(format!("confirmed flow {} has no booking", flow.id)))?;
        if flow.payment_status != Some(PaymentStatus::PayLater) {
            tracing::debug!("Duplicate confirmation for flow {} ignored", flow.id);
            return self.ledger.get_booking(booking_id).await;
        }

        let booking = match self
            .ledger
            .update_payment_status(booking_id, PaymentStatus::Paid, Some(&result.transaction_id))
            .await
        {
            Ok(booking) => booking,
            Err(e) => {
                tracing::warn!(
                    "Payment {} captured for flow {} could not settle booking {}: {}; refund required",
                    result.transaction_id, flow.id, booking_id, e
                );
                return Err(e);
            }
        };

        flow.payment_status = Some(PaymentStatus::Paid);
        flow.updated_at = self.clock.now();
        self.save(&flow).await?;
        tracing::info!("Flow {} pay-later booking {} settled by capture", flow.id, booking_id);
        Ok(booking)
    }

    /// A genuine capture for a flow that ended without a booking. Nothing is booked.
    async fn flag_unapplied_capture(&self, flow: &mut BookingFlow, payload: &SignedPayment) -> CoreResult<()> {
        let Ok(result) = self.payments.verify_payment(payload).await else {
            return Ok(());
        };
        tracing::warn!(
            "Payment {} captured for flow {} after it ended as {}; refund required",
            result.transaction_id, flow.id, flow.stage.as_str()
        );
        flow.last_error = Some(refund_required(&result.transaction_id));
        self.save(flow).await
    }

    /// Best effort; the sweeper reclaims anything left behind.
    async fn release_hold(&self, hold: &Hold) {
        match self.reservations.cancel_hold(hold.id, &hold.user_id).await {
            Ok(()) | Err(CoreError::NotFound { .. }) => {}
            Err(e) => tracing::warn!("Could not release hold {}: {}", hold.id, e),
        }
    }
}

fn issued_intent(flow: &BookingFlow, payload: &SignedPayment) -> bool {
    flow.intent.as_ref().is_some_and(|i| i.id == payload.intent_id)
}

fn refund_required(transaction_id: &str) -> String {
    format!("payment {} arrived after the flow ended; refund required", transaction_id)
}
