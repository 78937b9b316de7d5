use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockprep_core::models::{Resource, Service, Slot};
use mockprep_core::repository::{CatalogRepository, SlotRepository};
use mockprep_core::CoreResult;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::storage_error;

pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct ServiceRow {
    id: String,
    name: String,
    price: i64,
    features: Json<Vec<String>>,
    is_bookable: bool,
    has_details_page: bool,
    resources: Json<Vec<Resource>>,
    position: i32,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Service {
            id: row.id,
            name: row.name,
            price: row.price,
            features: row.features.0,
            is_bookable: row.is_bookable,
            has_details_page: row.has_details_page,
            resources: row.resources.0,
            position: row.position,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    service_id: String,
    starts_at: DateTime<Utc>,
    capacity: i32,
    confirmed: i32,
    retired: bool,
    created_at: DateTime<Utc>,
    held: i64,
}

impl From<SlotRow> for Slot {
    fn from(row: SlotRow) -> Self {
        Slot {
            id: row.id,
            service_id: row.service_id,
            starts_at: row.starts_at,
            capacity: row.capacity.max(0) as u32,
            held: row.held.max(0) as u32,
            confirmed: row.confirmed.max(0) as u32,
            retired: row.retired,
            created_at: row.created_at,
        }
    }
}

const SERVICE_COLUMNS: &str = "id, name, price, features, is_bookable, has_details_page, resources, position";

/// `held` counts holds still live at the bound `now` parameter.
const SLOT_SELECT: &str = r#"
    SELECT s.id, s.service_id, s.starts_at, s.capacity, s.confirmed, s.retired, s.created_at,
           (SELECT COUNT(*) FROM holds h WHERE h.slot_id = s.id AND h.expires_at > $1) AS held
    FROM slots s
"#;

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn list_services(&self) -> CoreResult<Vec<Service>> {
        let rows: Vec<ServiceRow> = sqlx::query_as(&format!("SELECT {} FROM services", SERVICE_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(rows.into_iter().map(Service::from).collect())
    }

    async fn get_service(&self, id: &str) -> CoreResult<Option<Service>> {
        let row: Option<ServiceRow> =
            sqlx::query_as(&format!("SELECT {} FROM services WHERE id = $1", SERVICE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(row.map(Service::from))
    }

    async fn upsert_service(&self, service: &Service) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO services (id, name, price, features, is_bookable, has_details_page, resources, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                features = EXCLUDED.features,
                is_bookable = EXCLUDED.is_bookable,
                has_details_page = EXCLUDED.has_details_page,
                resources = EXCLUDED.resources,
                position = EXCLUDED.position,
                updated_at = NOW()
            "#,
        )
        .bind(&service.id)
        .bind(&service.name)
        .bind(service.price)
        .bind(Json(&service.features))
        .bind(service.is_bookable)
        .bind(service.has_details_page)
        .bind(Json(&service.resources))
        .bind(service.position)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}

#[async_trait]
impl SlotRepository for PgCatalogRepository {
    async fn create_slot(&self, slot: &Slot) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO slots (id, service_id, starts_at, capacity, confirmed, retired, created_at)
            VALUES ($1, $2, $3, $4, 0, FALSE, $5)
            "#,
        )
        .bind(slot.id)
        .bind(&slot.service_id)
        .bind(slot.starts_at)
        .bind(slot.capacity as i32)
        .bind(slot.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn get_slot(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Option<Slot>> {
        let row: Option<SlotRow> = sqlx::query_as(&format!("{} WHERE s.id = $2", SLOT_SELECT))
            .bind(now)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(row.map(Slot::from))
    }

    async fn list_slots(
        &self,
        service_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Slot>> {
        let rows: Vec<SlotRow> = sqlx::query_as(&format!(
            "{} WHERE s.service_id = $2 AND NOT s.retired AND s.starts_at >= $3 AND s.starts_at < $4 ORDER BY s.starts_at",
            SLOT_SELECT
        ))
        .bind(now)
        .bind(service_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(rows.into_iter().map(Slot::from).collect())
    }

    async fn retire_slot(&self, id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query("UPDATE slots SET retired = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() == 1)
    }
}
