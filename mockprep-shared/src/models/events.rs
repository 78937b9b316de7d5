use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const BOOKING_CONFIRMED_TOPIC: &str = "booking.confirmed";
pub const BOOKING_CANCELLED_TOPIC: &str = "booking.cancelled";

/// Published whenever a slot's remaining room changes (hold created, released, converted).
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct SlotAvailabilityEvent {
    pub service_id: String,
    pub slot_id: Uuid,
    pub remaining: u32,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub service_id: String,
    pub slot_id: Uuid,
    pub user_id: String,
    pub payment_status: String,
    pub meeting_link: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub slot_id: Uuid,
    pub capacity_released: bool,
    pub reason: String,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmed_event_payload_shape() {
        let event = BookingConfirmedEvent {
            booking_id: Uuid::new_v4(),
            service_id: "upsc-mock".to_string(),
            slot_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            payment_status: "pay_later".to_string(),
            meeting_link: None,
            starts_at: Utc::now(),
            timestamp: 0,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["service_id"], "upsc-mock");
        assert_eq!(value["payment_status"], "pay_later");
        assert!(value["meeting_link"].is_null());
    }
}
