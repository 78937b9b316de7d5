use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use mockprep_booking::is_valid_email;
use mockprep_core::models::{BlogPost, ContactMessage, Testimonial};
use mockprep_core::{Clock, CoreError};
use mockprep_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const MAX_MESSAGE_LEN: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub id: Uuid,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/testimonials", get(list_testimonials))
        .route("/v1/blog", get(list_blog_posts))
        .route("/v1/blog/{slug}", get(get_blog_post))
        .route("/v1/messages", post(submit_message))
}

/// GET /v1/testimonials
async fn list_testimonials(State(state): State<AppState>) -> Result<Json<Vec<Testimonial>>, AppError> {
    Ok(Json(state.content.list_testimonials().await?))
}

/// GET /v1/blog
async fn list_blog_posts(State(state): State<AppState>) -> Result<Json<Vec<BlogPost>>, AppError> {
    let now = state.clock.now();
    let posts = state.content.list_blog_posts().await?;
    // Scheduled posts stay hidden until their publish time
    Ok(Json(posts.into_iter().filter(|p| p.published_at <= now).collect()))
}

/// GET /v1/blog/{slug}
async fn get_blog_post(State(state): State<AppState>, Path(slug): Path<String>) -> Result<Json<BlogPost>, AppError> {
    let post = state
        .content
        .get_blog_post(&slug)
        .await?
        .filter(|p| p.published_at <= state.clock.now())
        .ok_or_else(|| CoreError::not_found("blog post", &slug))?;
    Ok(Json(post))
}

/// POST /v1/messages
async fn submit_message(
    State(state): State<AppState>,
    Json(req): Json<ContactRequest>,
) -> Result<(StatusCode, Json<ContactResponse>), AppError> {
    let name = req.name.trim();
    let email = req.email.trim().to_lowercase();
    let message = req.message.trim();

    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if !is_valid_email(&email) {
        return Err(AppError::Validation("email is not a valid address".to_string()));
    }
    if message.is_empty() || message.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::Validation(format!(
            "message must be between 1 and {} characters",
            MAX_MESSAGE_LEN
        )));
    }

    let contact = ContactMessage {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: Masked::new(email),
        subject: req.subject.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        message: message.to_string(),
        created_at: state.clock.now(),
    };
    state.content.save_message(&contact).await?;
    tracing::info!("Contact message {} received from {}", contact.id, contact.email);

    Ok((StatusCode::CREATED, Json(ContactResponse { id: contact.id })))
}
