use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use mockprep_shared::pii::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

// ============================================================================
// Catalog
// ============================================================================

/// A bookable coaching product (mock interview, mentorship call, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Minor currency units.
    pub price: i64,
    pub features: Vec<String>,
    pub is_bookable: bool,
    #[serde(default)]
    pub has_details_page: bool,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub position: i32,
}

/// Study material attached to a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    Document { title: String, url: String },
    Video { title: String, url: String, duration_minutes: Option<u32> },
    Link { title: String, url: String },
}

impl Resource {
    pub fn title(&self) -> &str {
        match self {
            Resource::Document { title, .. } | Resource::Video { title, .. } | Resource::Link { title, .. } => title,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Resource::Document { url, .. } | Resource::Video { url, .. } | Resource::Link { url, .. } => url,
        }
    }
}

// ============================================================================
// Availability
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: Uuid,
    pub service_id: String,
    pub starts_at: DateTime<Utc>,
    pub capacity: u32,
    /// Non-expired holds at read time.
    pub held: u32,
    pub confirmed: u32,
    pub retired: bool,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    pub fn new(service_id: String, starts_at: DateTime<Utc>, capacity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            starts_at,
            capacity,
            held: 0,
            confirmed: 0,
            retired: false,
            created_at: Utc::now(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.starts_at.date_naive()
    }

    pub fn time(&self) -> NaiveTime {
        self.starts_at.time()
    }

    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.held + self.confirmed)
    }

    pub fn has_room(&self) -> bool {
        !self.retired && self.held + self.confirmed < self.capacity
    }

    /// `held + confirmed <= capacity`. A violation is never repaired in place.
    pub fn check_invariant(&self) -> CoreResult<()> {
        if self.held + self.confirmed > self.capacity {
            tracing::error!(
                "Slot {} counters inconsistent: held={} confirmed={} capacity={}",
                self.id, self.held, self.confirmed, self.capacity
            );
            return Err(CoreError::InvariantViolation(format!(
                "slot {} has held={} confirmed={} capacity={}",
                self.id, self.held, self.confirmed, self.capacity
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Reservations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hold {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    pub fn new(slot_id: Uuid, user_id: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot_id,
            user_id,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub slot_id: Uuid,
    pub user_id: String,
    pub ttl: Duration,
}

/// Result of a hold attempt when the (slot, user) pair may already be held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    Created(Hold),
    Existing(Hold),
}

impl HoldOutcome {
    pub fn hold(&self) -> &Hold {
        match self {
            HoldOutcome::Created(h) | HoldOutcome::Existing(h) => h,
        }
    }

    pub fn into_hold(self) -> Hold {
        match self {
            HoldOutcome::Created(h) | HoldOutcome::Existing(h) => h,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, HoldOutcome::Created(_))
    }
}

// ============================================================================
// Bookings
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    PayLater,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::PayLater => "pay_later",
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "pay_later" => Ok(PaymentStatus::PayLater),
            other => Err(CoreError::ValidationError(format!("unknown payment status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingApproval,
    Upcoming,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingApproval => "pending_approval",
            BookingStatus::Upcoming => "upcoming",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "pending_approval" => Ok(BookingStatus::PendingApproval),
            "upcoming" => Ok(BookingStatus::Upcoming),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(CoreError::ValidationError(format!("unknown booking status '{}'", other))),
        }
    }

    /// Admin-driven transitions. Cancellation has its own path because it touches slot capacity.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::PendingApproval, BookingStatus::Upcoming)
                | (BookingStatus::Upcoming, BookingStatus::Completed)
        )
    }
}

/// Contact details captured during the details step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactDetails {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    pub exam_applied: Option<String>,
    pub prior_attempts: Option<u32>,
}

/// Everything needed to write a booking when a hold is converted.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Uuid,
    pub service_id: String,
    pub user_id: String,
    pub contact: ContactDetails,
    pub amount: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub transaction_id: Option<String>,
    pub meeting_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub service_id: String,
    pub slot_id: Uuid,
    pub user_id: String,
    pub contact: ContactDetails,
    pub amount: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub transaction_id: Option<String>,
    pub meeting_link: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub capacity_released: bool,
}

impl Booking {
    pub fn from_new(new: NewBooking, slot: &Slot, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            service_id: new.service_id,
            slot_id: slot.id,
            user_id: new.user_id,
            contact: new.contact,
            amount: new.amount,
            currency: new.currency,
            payment_status: new.payment_status,
            status: new.status,
            transaction_id: new.transaction_id,
            meeting_link: new.meeting_link,
            starts_at: slot.starts_at,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
            capacity_released: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }
}

/// Result of a successful cancellation.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub booking: Booking,
    pub capacity_released: bool,
}

// ============================================================================
// Content
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMessage {
    pub id: Uuid,
    pub name: String,
    pub email: Masked<String>,
    pub subject: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Testimonial {
    pub id: Uuid,
    pub author: String,
    pub headline: Option<String>,
    pub quote: String,
    pub rating: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogPost {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
}
