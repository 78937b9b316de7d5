use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockprep_core::models::{
    Booking, BookingStatus, Cancellation, ContactDetails, Hold, HoldOutcome, HoldRequest, NewBooking, PaymentStatus,
    Slot,
};
use mockprep_core::repository::{BookingRepository, HoldRepository};
use mockprep_core::{CoreError, CoreResult};
use mockprep_shared::Masked;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::database::storage_error;

/// Holds and bookings share one repository: converting a hold touches both tables and the slot
/// row in a single transaction.
pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explains why a conditional booking update matched no row.
    async fn rejected_update(&self, id: Uuid, payment: Option<PaymentStatus>) -> CoreError {
        let current = match BookingRepository::get_booking(self, id).await {
            Ok(Some(booking)) => booking,
            Ok(None) => return CoreError::not_found("booking", id),
            Err(e) => return e,
        };
        if current.is_cancelled() {
            return CoreError::AlreadyCancelled(id);
        }
        match payment {
            Some(to) => CoreError::InvalidTransition {
                from: current.payment_status.as_str().to_string(),
                to: to.as_str().to_string(),
            },
            None => CoreError::Storage(format!("booking {} update matched no row", id)),
        }
    }
}

#[derive(sqlx::FromRow)]
struct HoldRow {
    id: Uuid,
    slot_id: Uuid,
    user_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<HoldRow> for Hold {
    fn from(row: HoldRow) -> Self {
        Hold {
            id: row.id,
            slot_id: row.slot_id,
            user_id: row.user_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

/// Slot columns read under `FOR UPDATE`.
#[derive(sqlx::FromRow)]
struct LockedSlotRow {
    id: Uuid,
    service_id: String,
    starts_at: DateTime<Utc>,
    capacity: i32,
    confirmed: i32,
    retired: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    service_id: String,
    slot_id: Uuid,
    user_id: String,
    contact_name: String,
    contact_email: String,
    contact_phone: String,
    exam_applied: Option<String>,
    prior_attempts: Option<i32>,
    amount: i64,
    currency: String,
    payment_status: String,
    status: String,
    transaction_id: Option<String>,
    meeting_link: Option<String>,
    starts_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    capacity_released: bool,
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |e: CoreError| CoreError::Storage(format!("booking {}: {}", id, e));
        Ok(Booking {
            id: row.id,
            service_id: row.service_id,
            slot_id: row.slot_id,
            user_id: row.user_id,
            contact: ContactDetails {
                name: row.contact_name,
                email: Masked::new(row.contact_email),
                phone: Masked::new(row.contact_phone),
                exam_applied: row.exam_applied,
                prior_attempts: row.prior_attempts.map(|n| n.max(0) as u32),
            },
            amount: row.amount,
            currency: row.currency,
            payment_status: PaymentStatus::parse(&row.payment_status).map_err(corrupt)?,
            status: BookingStatus::parse(&row.status).map_err(corrupt)?,
            transaction_id: row.transaction_id,
            meeting_link: row.meeting_link,
            starts_at: row.starts_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            cancelled_at: row.cancelled_at,
            capacity_released: row.capacity_released,
        })
    }
}

const HOLD_COLUMNS: &str = "id, slot_id, user_id, created_at, expires_at";

const BOOKING_COLUMNS: &str = "id, service_id, slot_id, user_id, contact_name, contact_email, contact_phone, \
     exam_applied, prior_attempts, amount, currency, payment_status, status, transaction_id, meeting_link, \
     starts_at, created_at, updated_at, cancelled_at, capacity_released";

async fn lock_slot(tx: &mut Transaction<'_, Postgres>, slot_id: Uuid) -> CoreResult<Option<LockedSlotRow>> {
    sqlx::query_as(
        "SELECT id, service_id, starts_at, capacity, confirmed, retired, created_at FROM slots WHERE id = $1 FOR UPDATE",
    )
    .bind(slot_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(storage_error)
}

async fn live_hold_count(tx: &mut Transaction<'_, Postgres>, slot_id: Uuid, now: DateTime<Utc>) -> CoreResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM holds WHERE slot_id = $1 AND expires_at > $2")
        .bind(slot_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage_error)?;
    Ok(count)
}

fn invariant_violation(slot: &LockedSlotRow, held: i64) -> CoreError {
    tracing::error!(
        "Slot {} counters inconsistent: held={} confirmed={} capacity={}",
        slot.id, held, slot.confirmed, slot.capacity
    );
    CoreError::InvariantViolation(format!(
        "slot {} has held={} confirmed={} capacity={}",
        slot.id, held, slot.confirmed, slot.capacity
    ))
}

#[async_trait]
impl HoldRepository for PgBookingRepository {
    async fn create_hold(&self, request: HoldRequest, now: DateTime<Utc>) -> CoreResult<HoldOutcome> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // 1. Serialize on the slot row
        let slot = lock_slot(&mut tx, request.slot_id)
            .await?
            .filter(|s| !s.retired)
            .ok_or_else(|| CoreError::not_found("slot", request.slot_id))?;
        if slot.starts_at <= now {
            return Err(CoreError::ValidationError(format!("slot {} has already started", slot.id)));
        }

        // 2. Lazy expiry for this slot
        sqlx::query("DELETE FROM holds WHERE slot_id = $1 AND expires_at <= $2")
            .bind(slot.id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        // 3. One hold per (slot, user)
        let existing: Option<HoldRow> =
            sqlx::query_as(&format!("SELECT {} FROM holds WHERE slot_id = $1 AND user_id = $2", HOLD_COLUMNS))
                .bind(slot.id)
                .bind(&request.user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?;
        if let Some(row) = existing {
            tx.commit().await.map_err(storage_error)?;
            return Ok(HoldOutcome::Existing(row.into()));
        }

        // 4. Capacity
        let held = live_hold_count(&mut tx, slot.id, now).await?;
        if held + slot.confirmed as i64 >= slot.capacity as i64 {
            tx.commit().await.map_err(storage_error)?;
            return Err(CoreError::SlotFull(slot.id));
        }

        let hold = Hold::new(slot.id, request.user_id, now, request.ttl);
        sqlx::query("INSERT INTO holds (id, slot_id, user_id, created_at, expires_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(hold.id)
            .bind(hold.slot_id)
            .bind(&hold.user_id)
            .bind(hold.created_at)
            .bind(hold.expires_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(HoldOutcome::Created(hold))
    }

    async fn get_hold(&self, id: Uuid) -> CoreResult<Option<Hold>> {
        let row: Option<HoldRow> = sqlx::query_as(&format!("SELECT {} FROM holds WHERE id = $1", HOLD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(row.map(Hold::from))
    }

    async fn delete_hold(&self, id: Uuid) -> CoreResult<Option<Hold>> {
        let row: Option<HoldRow> =
            sqlx::query_as(&format!("DELETE FROM holds WHERE id = $1 RETURNING {}", HOLD_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(row.map(Hold::from))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<Vec<Hold>> {
        let rows: Vec<HoldRow> =
            sqlx::query_as(&format!("DELETE FROM holds WHERE expires_at <= $1 RETURNING {}", HOLD_COLUMNS))
                .bind(now)
                .fetch_all(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(rows.into_iter().map(Hold::from).collect())
    }

    async fn convert_hold(&self, hold_id: Uuid, booking: NewBooking, now: DateTime<Utc>) -> CoreResult<Booking> {
        let slot_id: Option<(Uuid,)> = sqlx::query_as("SELECT slot_id FROM holds WHERE id = $1")
            .bind(hold_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        let (slot_id,) = slot_id.ok_or_else(|| CoreError::not_found("hold", hold_id))?;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // 1. Serialize on the slot row, then re-read the hold under that lock
        let slot = lock_slot(&mut tx, slot_id)
            .await?
            .ok_or_else(|| CoreError::not_found("slot", slot_id))?;
        let hold: Hold = sqlx::query_as::<_, HoldRow>(&format!("SELECT {} FROM holds WHERE id = $1", HOLD_COLUMNS))
            .bind(hold_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_error)?
            .map(Hold::from)
            .ok_or_else(|| CoreError::not_found("hold", hold_id))?;

        // 2. Expiry is decided inside the transaction
        if hold.is_expired(now) {
            sqlx::query("DELETE FROM holds WHERE id = $1")
                .bind(hold_id)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
            tx.commit().await.map_err(storage_error)?;
            return Err(CoreError::HoldExpired(hold_id));
        }

        // 3. The hold being converted is part of `held`
        let held = live_hold_count(&mut tx, slot.id, now).await?;
        if held + slot.confirmed as i64 > slot.capacity as i64 {
            return Err(invariant_violation(&slot, held));
        }

        let deleted = sqlx::query("DELETE FROM holds WHERE id = $1")
            .bind(hold_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        if deleted.rows_affected() != 1 {
            return Err(CoreError::not_found("hold", hold_id));
        }

        sqlx::query("UPDATE slots SET confirmed = confirmed + 1 WHERE id = $1")
            .bind(slot.id)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        let view = Slot {
            id: slot.id,
            service_id: slot.service_id,
            starts_at: slot.starts_at,
            capacity: slot.capacity.max(0) as u32,
            held: 0,
            confirmed: (slot.confirmed + 1).max(0) as u32,
            retired: slot.retired,
            created_at: slot.created_at,
        };
        let record = Booking::from_new(booking, &view, now);

        // 4. Insert the booking
        sqlx::query(&format!(
            "INSERT INTO bookings ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
            BOOKING_COLUMNS
        ))
        .bind(record.id)
        .bind(&record.service_id)
        .bind(record.slot_id)
        .bind(&record.user_id)
        .bind(&record.contact.name)
        .bind(record.contact.email.expose())
        .bind(record.contact.phone.expose())
        .bind(&record.contact.exam_applied)
        .bind(record.contact.prior_attempts.map(|n| n.min(i32::MAX as u32) as i32))
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.payment_status.as_str())
        .bind(record.status.as_str())
        .bind(&record.transaction_id)
        .bind(&record.meeting_link)
        .bind(record.starts_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.cancelled_at)
        .bind(record.capacity_released)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(record)
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> CoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn list_all_bookings(&self) -> CoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> =
            sqlx::query_as(&format!("SELECT {} FROM bookings ORDER BY created_at DESC", BOOKING_COLUMNS))
                .fetch_all(&self.pool)
                .await
                .map_err(storage_error)?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        transaction_id: Option<&str>,
    ) -> CoreResult<Booking> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            r#"
            UPDATE bookings
            SET payment_status = $2,
                transaction_id = COALESCE($3, transaction_id),
                status = CASE WHEN $2 = 'paid' AND status = 'pending_approval' THEN 'upcoming' ELSE status END,
                updated_at = NOW()
            WHERE id = $1 AND status <> 'cancelled' AND (payment_status <> 'paid' OR $2 = 'paid')
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected_update(id, Some(status)).await),
        }
    }

    async fn update_status(&self, id: Uuid, status: BookingStatus) -> CoreResult<Booking> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1 AND status <> 'cancelled' RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejected_update(id, None).await),
        }
    }

    async fn cancel_booking(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<Cancellation> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let booking: Booking = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| CoreError::not_found("booking", id))?
        .try_into()?;

        if booking.is_cancelled() {
            return Err(CoreError::AlreadyCancelled(id));
        }

        let release = now < booking.starts_at;
        if release {
            let slot = lock_slot(&mut tx, booking.slot_id)
                .await?
                .ok_or_else(|| CoreError::not_found("slot", booking.slot_id))?;
            if slot.confirmed <= 0 {
                tracing::error!("Slot {} has no confirmed unit to release for booking {}", slot.id, id);
                return Err(CoreError::InvariantViolation(format!(
                    "slot {} confirmed count is zero while booking {} is active",
                    slot.id, id
                )));
            }
            sqlx::query("UPDATE slots SET confirmed = confirmed - 1 WHERE id = $1")
                .bind(slot.id)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        let row: BookingRow = sqlx::query_as(&format!(
            r#"
            UPDATE bookings
            SET status = $2, cancelled_at = $3, capacity_released = $4, updated_at = $3
            WHERE id = $1
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(BookingStatus::Cancelled.as_str())
        .bind(now)
        .bind(release)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(Cancellation { booking: row.try_into()?, capacity_released: release })
    }
}
