use chrono::Duration;
use serde::{Deserialize, Serialize};

/// What to do when a user asks for a slot they already hold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHoldPolicy {
    /// Hand back the live hold unchanged.
    #[default]
    ReturnExisting,
    /// Refuse with `HoldAlreadyExists`.
    Reject,
}

/// Tunables for the booking flow.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub hold_ttl: Duration,
    pub max_payment_attempts: u32,
    /// Pay-later bookings must be settled this long before the session starts.
    pub pay_later_deadline: Duration,
    /// How long a flow record outlives its last update.
    pub flow_retention: Duration,
    pub currency: String,
    pub meeting_base_url: String,
    pub duplicate_holds: DuplicateHoldPolicy,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(15),
            max_payment_attempts: 2,
            pay_later_deadline: Duration::hours(24),
            flow_retention: Duration::hours(2),
            currency: "INR".to_string(),
            meeting_base_url: "https://meet.mockprep.in".to_string(),
            duplicate_holds: DuplicateHoldPolicy::ReturnExisting,
        }
    }
}

impl BookingPolicy {
    pub fn meeting_link(&self, booking_id: uuid::Uuid) -> String {
        format!("{}/{}", self.meeting_base_url.trim_end_matches('/'), booking_id.simple())
    }
}
