use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{Stream, StreamExt};
use mockprep_catalog::DateRange;
use mockprep_core::models::{Service, Slot};
use mockprep_core::Clock;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub id: Uuid,
    pub service_id: String,
    pub starts_at: DateTime<Utc>,
    pub date: String,
    pub time: String,
    pub capacity: u32,
    pub remaining: u32,
}

impl From<Slot> for SlotView {
    fn from(slot: Slot) -> Self {
        Self {
            id: slot.id,
            date: slot.date().to_string(),
            time: slot.time().format("%H:%M").to_string(),
            remaining: slot.remaining(),
            service_id: slot.service_id,
            starts_at: slot.starts_at,
            capacity: slot.capacity,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/services", get(list_services))
        .route("/v1/services/{id}", get(get_service))
        .route("/v1/services/{id}/slots", get(list_slots))
        .route("/v1/services/{id}/slots/stream", get(stream_slots))
}

/// GET /v1/services
async fn list_services(State(state): State<AppState>) -> Result<Json<Vec<Service>>, AppError> {
    Ok(Json(state.orchestrator.catalog().list_services().await?))
}

/// GET /v1/services/{id}
async fn get_service(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Service>, AppError> {
    Ok(Json(state.orchestrator.catalog().get_service(&id).await?))
}

/// GET /v1/services/{id}/slots?from&to
/// Only slots with room for another hold are listed.
async fn list_slots(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Vec<SlotView>>, AppError> {
    let range = match (query.from, query.to) {
        (None, None) => DateRange::upcoming(state.clock.now()),
        (Some(from), None) => DateRange::new(from, from + Duration::days(14))?,
        (from, Some(to)) => DateRange::new(from.unwrap_or_else(|| state.clock.now()), to)?,
    };

    let slots = state.orchestrator.availability().list_slots(&id, range).await?;
    Ok(Json(slots.into_iter().map(SlotView::from).collect()))
}

/// GET /v1/services/{id}/slots/stream
/// Server-sent `availability` events for the service's slots.
async fn stream_slots(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let service = state.orchestrator.catalog().get_service(&id).await?;
    let rx = state.orchestrator.reservations().subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let service_id = service.id.clone();
        async move {
            match result {
                Ok(event) if event.service_id == service_id => {
                    let event = Event::default().event("availability").json_data(&event).ok()?;
                    Some(Ok(event))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Availability stream lagged: {}", e);
                    None
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
