use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use mockprep_booking::{BookingFlow, DetailsInput};
use mockprep_core::models::Booking;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{circuit_breaker_middleware, Claims};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartFlowRequest {
    pub service_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HoldSlotRequest {
    pub slot_id: Uuid,
}

/// A flow plus the moment its hold lapses, so clients can show a countdown.
#[derive(Debug, Serialize)]
pub struct FlowResponse {
    #[serde(flatten)]
    pub flow: BookingFlow,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<BookingFlow> for FlowResponse {
    fn from(flow: BookingFlow) -> Self {
        let expires_at = if flow.stage.is_terminal() { None } else { flow.expires_at() };
        Self { flow, expires_at }
    }
}

/// Customer routes. The caller layers customer auth on top.
pub fn routes(state: AppState) -> Router<AppState> {
    let payment = Router::new()
        .route("/v1/flows/{id}/payment-intent", post(begin_payment))
        .layer(axum::middleware::from_fn_with_state(state, circuit_breaker_middleware));

    Router::new()
        .route("/v1/flows", post(start_flow))
        .route("/v1/flows/{id}", get(get_flow).delete(cancel_flow))
        .route("/v1/flows/{id}/hold", post(hold_slot))
        .route("/v1/flows/{id}/details", post(submit_details))
        .route("/v1/flows/{id}/pay-later", post(pay_later))
        .merge(payment)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/flows
async fn start_flow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartFlowRequest>,
) -> Result<(StatusCode, Json<FlowResponse>), AppError> {
    let flow = state.orchestrator.start(&claims.sub, &req.service_id).await?;
    Ok((StatusCode::CREATED, Json(flow.into())))
}

/// GET /v1/flows/{id}
async fn get_flow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowResponse>, AppError> {
    Ok(Json(state.orchestrator.get(id, &claims.sub).await?.into()))
}

/// POST /v1/flows/{id}/hold
async fn hold_slot(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<HoldSlotRequest>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = state.orchestrator.hold_slot(id, &claims.sub, req.slot_id).await?;
    Ok(Json(flow.into()))
}

/// POST /v1/flows/{id}/details
async fn submit_details(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<DetailsInput>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = state.orchestrator.submit_details(id, &claims.sub, req).await?;
    Ok(Json(flow.into()))
}

/// POST /v1/flows/{id}/payment-intent
async fn begin_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = state.orchestrator.begin_payment(id, &claims.sub).await?;
    Ok(Json(flow.into()))
}

/// POST /v1/flows/{id}/pay-later
async fn pay_later(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = state.orchestrator.choose_pay_later(id, &claims.sub).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// DELETE /v1/flows/{id}
async fn cancel_flow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowResponse>, AppError> {
    Ok(Json(state.orchestrator.cancel(id, &claims.sub).await?.into()))
}
