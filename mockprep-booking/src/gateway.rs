use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use mockprep_core::payment::{PaymentAdapter, PaymentIntent, PaymentResult, SignedPayment};
use mockprep_core::{CoreError, CoreResult};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Statuses the gateway reports for a completed capture.
const CAPTURED_STATUSES: [&str; 2] = ["captured", "succeeded"];

/// Gateway adapter for a hosted checkout that confirms payments with an HMAC-SHA256 signature
/// over `intent_id|transaction_id|status`.
pub struct HmacPaymentGateway {
    secret: Vec<u8>,
}

impl HmacPaymentGateway {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Lowercase hex signature for a confirmation.
    pub fn sign(&self, intent_id: &str, transaction_id: &str, status: &str) -> CoreResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CoreError::GatewayUnavailable(format!("bad signing key: {}", e)))?;
        mac.update(signing_payload(intent_id, transaction_id, status).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Builds a fully signed confirmation, as the gateway itself would send it.
    pub fn signed(&self, intent: &PaymentIntent, transaction_id: &str, status: &str) -> CoreResult<SignedPayment> {
        Ok(SignedPayment {
            intent_id: intent.id.clone(),
            reference_id: intent.reference_id,
            transaction_id: transaction_id.to_string(),
            status: status.to_string(),
            signature: self.sign(&intent.id, transaction_id, status)?,
        })
    }
}

fn signing_payload(intent_id: &str, transaction_id: &str, status: &str) -> String {
    format!("{}|{}|{}", intent_id, transaction_id, status)
}

#[async_trait]
impl PaymentAdapter for HmacPaymentGateway {
    async fn create_intent(&self, amount: i64, currency: &str, reference_id: Uuid) -> CoreResult<PaymentIntent> {
        if amount <= 0 {
            return Err(CoreError::ValidationError("payment amount must be positive".into()));
        }

        let id = format!("pi_{}", Uuid::new_v4().simple());
        let client_secret = format!("{}_secret_{}", id, Uuid::new_v4().simple());
        tracing::debug!("Payment intent {} created for {} ({} {})", id, reference_id, amount, currency);

        Ok(PaymentIntent {
            id,
            reference_id,
            amount,
            currency: currency.to_string(),
            client_secret: Some(client_secret),
            created_at: Utc::now(),
        })
    }

    async fn verify_payment(&self, payload: &SignedPayment) -> CoreResult<PaymentResult> {
        let expected = self.sign(&payload.intent_id, &payload.transaction_id, &payload.status)?;
        let provided = payload.signature.trim().to_ascii_lowercase();
        if !constant_time_eq::constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
            tracing::warn!("Rejected payment confirmation for intent {}: bad signature", payload.intent_id);
            return Err(CoreError::InvalidSignature);
        }

        if !CAPTURED_STATUSES.contains(&payload.status.as_str()) {
            return Err(CoreError::PaymentDeclined(payload.status.clone()));
        }

        Ok(PaymentResult { success: true, transaction_id: payload.transaction_id.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn intent(gateway: &HmacPaymentGateway) -> PaymentIntent {
        gateway.create_intent(250000, "INR", Uuid::new_v4()).await.unwrap()
    }

    #[tokio::test]
    async fn test_valid_signature_is_accepted() {
        let gateway = HmacPaymentGateway::new("whsec_test");
        let intent = intent(&gateway).await;
        let payload = gateway.signed(&intent, "txn_42", "captured").unwrap();

        let result = gateway.verify_payment(&payload).await.unwrap();
        assert!(result.success);
        assert_eq!(result.transaction_id, "txn_42");
    }

    #[tokio::test]
    async fn test_tampered_payload_is_rejected() {
        let gateway = HmacPaymentGateway::new("whsec_test");
        let intent = intent(&gateway).await;
        let mut payload = gateway.signed(&intent, "txn_42", "failed").unwrap();
        payload.status = "captured".into();

        assert!(matches!(gateway.verify_payment(&payload).await, Err(CoreError::InvalidSignature)));
    }

    #[tokio::test]
    async fn test_foreign_secret_is_rejected() {
        let ours = HmacPaymentGateway::new("whsec_test");
        let theirs = HmacPaymentGateway::new("whsec_other");
        let intent = intent(&ours).await;
        let payload = theirs.signed(&intent, "txn_1", "captured").unwrap();

        assert!(matches!(ours.verify_payment(&payload).await, Err(CoreError::InvalidSignature)));
    }

    #[tokio::test]
    async fn test_signed_failure_is_a_decline() {
        let gateway = HmacPaymentGateway::new("whsec_test");
        let intent = intent(&gateway).await;
        let payload = gateway.signed(&intent, "txn_7", "failed").unwrap();

        assert!(matches!(gateway.verify_payment(&payload).await, Err(CoreError::PaymentDeclined(_))));
    }

    #[tokio::test]
    async fn test_zero_amount_intent_is_refused() {
        let gateway = HmacPaymentGateway::new("whsec_test");
        assert!(gateway.create_intent(0, "INR", Uuid::new_v4()).await.is_err());
    }

    #[test]
    fn test_signature_is_lowercase_hex() {
        let gateway = HmacPaymentGateway::new("k");
        let sig = gateway.sign("pi_1", "txn_1", "captured").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
