use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use mockprep_core::models::Booking;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub booking: Booking,
    pub capacity_released: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/me/bookings", get(list_my_bookings))
        .route("/v1/me/bookings/{id}/cancel", post(cancel_my_booking))
}

/// GET /v1/me/bookings
async fn list_my_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let mut bookings = state.orchestrator.ledger().list_for_user(&claims.sub).await?;
    bookings.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
    Ok(Json(bookings))
}

/// POST /v1/me/bookings/{id}/cancel
async fn cancel_my_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancellationResponse>, AppError> {
    let cancellation = state.orchestrator.ledger().cancel_for_user(id, &claims.sub).await?;
    tracing::info!("Booking {} cancelled by its owner", id);

    Ok(Json(CancellationResponse {
        booking: cancellation.booking,
        capacity_released: cancellation.capacity_released,
    }))
}
