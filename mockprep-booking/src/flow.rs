use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mockprep_core::models::{ContactDetails, Hold, PaymentStatus, Service};
use mockprep_core::payment::PaymentIntent;
use mockprep_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    ServiceSelected,
    SlotHeld,
    DetailsCollected,
    PaymentPending,
    Confirmed,
    HoldExpired,
    PaymentFailed,
    Cancelled,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::ServiceSelected => "service_selected",
            FlowStage::SlotHeld => "slot_held",
            FlowStage::DetailsCollected => "details_collected",
            FlowStage::PaymentPending => "payment_pending",
            FlowStage::Confirmed => "confirmed",
            FlowStage::HoldExpired => "hold_expired",
            FlowStage::PaymentFailed => "payment_failed",
            FlowStage::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowStage::Confirmed | FlowStage::HoldExpired | FlowStage::PaymentFailed | FlowStage::Cancelled
        )
    }
}

/// Server-side record of one user's walk through the booking steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingFlow {
    pub id: Uuid,
    pub user_id: String,
    pub service_id: String,
    pub amount: i64,
    pub currency: String,
    pub stage: FlowStage,
    pub hold: Option<Hold>,
    pub details: Option<ContactDetails>,
    pub intent: Option<PaymentIntent>,
    pub payment_attempts: u32,
    pub booking_id: Option<Uuid>,
    pub payment_status: Option<PaymentStatus>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingFlow {
    pub fn new(user_id: String, service: &Service, currency: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            service_id: service.id.clone(),
            amount: service.price,
            currency: currency.to_string(),
            stage: FlowStage::ServiceSelected,
            hold: None,
            details: None,
            intent: None,
            payment_attempts: 0,
            booking_id: None,
            payment_status: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.hold.as_ref().map(|h| h.expires_at)
    }

    /// True once a non-terminal flow's hold has lapsed.
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        !self.stage.is_terminal() && self.hold.as_ref().is_some_and(|h| h.is_expired(now))
    }

    pub fn ensure_owner(&self, user_id: &str) -> CoreResult<()> {
        if self.user_id != user_id {
            return Err(CoreError::NotOwner(format!("flow {}", self.id)));
        }
        Ok(())
    }

    /// Guards a step. An expired flow reports the lapsed hold rather than a plain bad transition.
    pub fn ensure_stage(&self, allowed: &[FlowStage], to: FlowStage) -> CoreResult<()> {
        if allowed.contains(&self.stage) {
            return Ok(());
        }
        if self.stage == FlowStage::HoldExpired {
            return Err(CoreError::HoldExpired(self.hold.as_ref().map(|h| h.id).unwrap_or(self.id)));
        }
        Err(CoreError::InvalidTransition {
            from: self.stage.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }

    pub fn advance(&mut self, stage: FlowStage, now: DateTime<Utc>) {
        self.stage = stage;
        self.updated_at = now;
    }

    /// Entered details are dropped with the hold. The issued intent stays so a late capture
    /// is still recognised.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) {
        self.details = None;
        self.advance(FlowStage::HoldExpired, now);
    }
}

/// Persistence for in-progress flows. Entries disappear after their ttl.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn save(&self, flow: &BookingFlow, ttl: Duration) -> CoreResult<()>;

    async fn load(&self, id: Uuid) -> CoreResult<Option<BookingFlow>>;
}

/// Process-local flow store.
#[derive(Default)]
pub struct MemoryFlowStore {
    flows: Mutex<HashMap<Uuid, (BookingFlow, Instant)>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn save(&self, flow: &BookingFlow, ttl: Duration) -> CoreResult<()> {
        let deadline = Instant::now() + ttl.to_std().unwrap_or_default();
        let mut flows = self.flows.lock().await;
        flows.retain(|_, (_, until)| *until > Instant::now());
        flows.insert(flow.id, (flow.clone(), deadline));
        Ok(())
    }

    async fn load(&self, id: Uuid) -> CoreResult<Option<BookingFlow>> {
        let flows = self.flows.lock().await;
        Ok(flows
            .get(&id)
            .filter(|(_, until)| *until > Instant::now())
            .map(|(flow, _)| flow.clone()))
    }
}
