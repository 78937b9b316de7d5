use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use mockprep_core::payment::SignedPayment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Gateway confirmation body. The signature travels in `X-Signature`.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    pub intent_id: String,
    pub reference_id: Uuid,
    pub transaction_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub booking_id: Uuid,
    pub status: String,
    pub payment_status: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// POST /v1/webhooks/payments
/// Nothing in the body is trusted until the orchestrator has verified the signature.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PaymentWebhook>,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Validation("Missing X-Signature header".to_string()))?;

    tracing::info!(
        "Received payment webhook for intent {} (flow {}): {}",
        payload.intent_id, payload.reference_id, payload.status
    );

    let signed = SignedPayment {
        intent_id: payload.intent_id,
        reference_id: payload.reference_id,
        transaction_id: payload.transaction_id,
        status: payload.status,
        signature: signature.trim().to_string(),
    };

    let booking = state.orchestrator.confirm_payment(&signed).await?;

    Ok(Json(WebhookAck {
        booking_id: booking.id,
        status: booking.status.as_str().to_string(),
        payment_status: booking.payment_status.as_str().to_string(),
    }))
}
