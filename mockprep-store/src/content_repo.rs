use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockprep_core::models::{BlogPost, ContactMessage, Testimonial};
use mockprep_core::repository::ContentRepository;
use mockprep_core::CoreResult;
use mockprep_shared::Masked;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::storage_error;

pub struct PgContentRepository {
    pool: PgPool,
}

impl PgContentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    name: String,
    email: String,
    subject: Option<String>,
    message: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TestimonialRow {
    id: Uuid,
    author: String,
    headline: Option<String>,
    quote: String,
    rating: i16,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BlogPostRow {
    id: Uuid,
    slug: String,
    title: String,
    summary: String,
    body: String,
    published_at: DateTime<Utc>,
}

impl From<BlogPostRow> for BlogPost {
    fn from(row: BlogPostRow) -> Self {
        BlogPost {
            id: row.id,
            slug: row.slug,
            title: row.title,
            summary: row.summary,
            body: row.body,
            published_at: row.published_at,
        }
    }
}

#[async_trait]
impl ContentRepository for PgContentRepository {
    async fn save_message(&self, message: &ContactMessage) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO contact_messages (id, name, email, subject, message, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(message.id)
        .bind(&message.name)
        .bind(message.email.expose())
        .bind(&message.subject)
        .bind(&message.message)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn list_messages(&self) -> CoreResult<Vec<ContactMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, name, email, subject, message, created_at FROM contact_messages ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|r| ContactMessage {
                id: r.id,
                name: r.name,
                email: Masked::new(r.email),
                subject: r.subject,
                message: r.message,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn save_testimonial(&self, testimonial: &Testimonial) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO testimonials (id, author, headline, quote, rating, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(testimonial.id)
        .bind(&testimonial.author)
        .bind(&testimonial.headline)
        .bind(&testimonial.quote)
        .bind(testimonial.rating as i16)
        .bind(testimonial.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn list_testimonials(&self) -> CoreResult<Vec<Testimonial>> {
        let rows: Vec<TestimonialRow> = sqlx::query_as(
            "SELECT id, author, headline, quote, rating, created_at FROM testimonials ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|r| Testimonial {
                id: r.id,
                author: r.author,
                headline: r.headline,
                quote: r.quote,
                rating: r.rating.clamp(0, u8::MAX as i16) as u8,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn save_blog_post(&self, post: &BlogPost) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blog_posts (id, slug, title, summary, body, published_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (slug) DO UPDATE SET
                title = EXCLUDED.title,
                summary = EXCLUDED.summary,
                body = EXCLUDED.body,
                published_at = EXCLUDED.published_at
            "#,
        )
        .bind(post.id)
        .bind(&post.slug)
        .bind(&post.title)
        .bind(&post.summary)
        .bind(&post.body)
        .bind(post.published_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn list_blog_posts(&self) -> CoreResult<Vec<BlogPost>> {
        let rows: Vec<BlogPostRow> = sqlx::query_as(
            "SELECT id, slug, title, summary, body, published_at FROM blog_posts ORDER BY published_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(rows.into_iter().map(BlogPost::from).collect())
    }

    async fn get_blog_post(&self, slug: &str) -> CoreResult<Option<BlogPost>> {
        let row: Option<BlogPostRow> =
            sqlx::query_as("SELECT id, slug, title, summary, body, published_at FROM blog_posts WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(row.map(BlogPost::from))
    }
}
