use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use mockprep_booking::BookingOverview;
use mockprep_core::models::{BlogPost, Booking, BookingStatus, ContactMessage, PaymentStatus, Service, Testimonial};
use mockprep_core::Clock;
use serde::Deserialize;
use uuid::Uuid;

use crate::bookings::CancellationResponse;
use crate::catalog::SlotView;
use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub service_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: BookingStatus,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AdminCancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSlotRequest {
    pub starts_at: DateTime<Utc>,
    pub capacity: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateTestimonialRequest {
    pub author: String,
    pub headline: Option<String>,
    pub quote: String,
    pub rating: u8,
}

#[derive(Debug, Deserialize)]
pub struct CreateBlogPostRequest {
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Admin routes. The caller layers admin auth on top.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/overview", get(overview))
        .route("/v1/admin/bookings", get(list_bookings))
        .route("/v1/admin/bookings/{id}/status", post(update_status))
        .route("/v1/admin/bookings/{id}/payment-status", post(update_payment_status))
        .route("/v1/admin/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/admin/services/{id}", put(upsert_service))
        .route("/v1/admin/services/{id}/slots", post(create_slot))
        .route("/v1/admin/slots/{id}", delete(retire_slot))
        .route("/v1/admin/messages", get(list_messages))
        .route("/v1/admin/testimonials", post(create_testimonial))
        .route("/v1/admin/blog", post(create_blog_post))
}

// ============================================================================
// Bookings
// ============================================================================

/// GET /v1/admin/overview
async fn overview(State(state): State<AppState>) -> Result<Json<BookingOverview>, AppError> {
    Ok(Json(state.orchestrator.ledger().overview().await?))
}

/// GET /v1/admin/bookings
async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<ListBookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let mut bookings: Vec<Booking> = state
        .orchestrator
        .ledger()
        .list_all()
        .await?
        .into_iter()
        .filter(|b| query.status.map_or(true, |s| b.status == s))
        .filter(|b| query.payment_status.map_or(true, |s| b.payment_status == s))
        .filter(|b| query.service_id.as_deref().map_or(true, |id| b.service_id == id))
        .collect();

    bookings.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
    Ok(Json(bookings))
}

/// POST /v1/admin/bookings/{id}/status
async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.orchestrator.ledger().update_status(id, req.status).await?;
    tracing::info!("Booking {} moved to {} by {}", id, booking.status.as_str(), claims.sub);
    Ok(Json(booking))
}

/// POST /v1/admin/bookings/{id}/payment-status
async fn update_payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .orchestrator
        .ledger()
        .update_payment_status(id, req.payment_status, req.transaction_id.as_deref())
        .await?;
    tracing::info!("Booking {} payment marked {} by {}", id, booking.payment_status.as_str(), claims.sub);
    Ok(Json(booking))
}

/// POST /v1/admin/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<CancellationResponse>, AppError> {
    // The body is optional
    let request = if body.is_empty() {
        AdminCancelRequest::default()
    } else {
        serde_json::from_slice::<AdminCancelRequest>(&body)
            .map_err(|e| AppError::Validation(format!("Invalid cancel request: {}", e)))?
    };
    let reason = request
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "admin".to_string());

    let cancellation = state.orchestrator.ledger().cancel(id, &reason).await?;
    Ok(Json(CancellationResponse {
        booking: cancellation.booking,
        capacity_released: cancellation.capacity_released,
    }))
}

// ============================================================================
// Catalog & Availability
// ============================================================================

/// PUT /v1/admin/services/{id}
async fn upsert_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(service): Json<Service>,
) -> Result<Json<Service>, AppError> {
    if service.id != id {
        return Err(AppError::Validation(format!(
            "body id '{}' does not match path id '{}'",
            service.id, id
        )));
    }
    Ok(Json(state.orchestrator.catalog().upsert_service(service).await?))
}

/// POST /v1/admin/services/{id}/slots
async fn create_slot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateSlotRequest>,
) -> Result<(StatusCode, Json<SlotView>), AppError> {
    let slot = state
        .orchestrator
        .availability()
        .create_slot(&id, req.starts_at, req.capacity)
        .await?;
    Ok((StatusCode::CREATED, Json(slot.into())))
}

/// DELETE /v1/admin/slots/{id}
async fn retire_slot(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    state.orchestrator.availability().retire_slot(id).await?;
    state.orchestrator.reservations().announce(id).await;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Content
// ============================================================================

/// GET /v1/admin/messages
async fn list_messages(State(state): State<AppState>) -> Result<Json<Vec<ContactMessage>>, AppError> {
    Ok(Json(state.content.list_messages().await?))
}

/// POST /v1/admin/testimonials
async fn create_testimonial(
    State(state): State<AppState>,
    Json(req): Json<CreateTestimonialRequest>,
) -> Result<(StatusCode, Json<Testimonial>), AppError> {
    if req.author.trim().is_empty() || req.quote.trim().is_empty() {
        return Err(AppError::Validation("author and quote are required".to_string()));
    }
    if !(1..=5).contains(&req.rating) {
        return Err(AppError::Validation("rating must be between 1 and 5".to_string()));
    }

    let testimonial = Testimonial {
        id: Uuid::new_v4(),
        author: req.author.trim().to_string(),
        headline: req.headline,
        quote: req.quote.trim().to_string(),
        rating: req.rating,
        created_at: state.clock.now(),
    };
    state.content.save_testimonial(&testimonial).await?;
    Ok((StatusCode::CREATED, Json(testimonial)))
}

/// POST /v1/admin/blog
/// Re-posting an existing slug replaces that post.
async fn create_blog_post(
    State(state): State<AppState>,
    Json(req): Json<CreateBlogPostRequest>,
) -> Result<(StatusCode, Json<BlogPost>), AppError> {
    let slug = req.slug.trim();
    if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(AppError::Validation(format!("slug '{}' must be a lowercase slug", slug)));
    }
    if req.title.trim().is_empty() || req.body.trim().is_empty() {
        return Err(AppError::Validation("title and body are required".to_string()));
    }

    let post = BlogPost {
        id: Uuid::new_v4(),
        slug: slug.to_string(),
        title: req.title.trim().to_string(),
        summary: req.summary.trim().to_string(),
        body: req.body,
        published_at: req.published_at.unwrap_or_else(|| state.clock.now()),
    };
    state.content.save_blog_post(&post).await?;
    Ok((StatusCode::CREATED, Json(post)))
}
