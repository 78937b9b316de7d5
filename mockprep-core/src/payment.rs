use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String, // Provider's ID (e.g., pi_123)
    /// Our draft reference (the booking flow id).
    pub reference_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub client_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Inbound confirmation as delivered by the gateway (webhook body + signature header).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayment {
    pub intent_id: String,
    pub reference_id: Uuid,
    pub transaction_id: String,
    pub status: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentResult {
    pub success: bool,
    pub transaction_id: String,
}

/// External payment gateway boundary. Nothing it returns is trusted until `verify_payment` passes.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Create a payment intent with the provider
    async fn create_intent(&self, amount: i64, currency: &str, reference_id: Uuid) -> CoreResult<PaymentIntent>;

    /// Verify a signed confirmation. Fails with `InvalidSignature` or `PaymentDeclined`.
    async fn verify_payment(&self, payload: &SignedPayment) -> CoreResult<PaymentResult>;
}
