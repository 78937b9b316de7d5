pub mod clock;
pub mod memory;
pub mod models;
pub mod notify;
pub mod payment;
pub mod repository;

use uuid::Uuid;

pub use clock::{Clock, ManualClock, SystemClock};

/// Error categories surfaced to callers. Each `CoreError` belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Expired,
    ExternalFailure,
    InvariantViolation,
    Validation,
    Forbidden,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Slot {0} has no remaining capacity")]
    SlotFull(Uuid),

    #[error("User already holds slot {slot_id} (hold {hold_id})")]
    HoldAlreadyExists { slot_id: Uuid, hold_id: Uuid },

    #[error("Hold {0} has expired")]
    HoldExpired(Uuid),

    #[error("Booking {0} is already cancelled")]
    AlreadyCancelled(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Caller does not own {0}")]
    NotOwner(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Payment signature verification failed")]
    InvalidSignature,

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment attempts exhausted for flow {0}")]
    PaymentAttemptsExhausted(Uuid),

    #[error("Capacity invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound { entity, id: id.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::SlotFull(_)
            | CoreError::HoldAlreadyExists { .. }
            | CoreError::AlreadyCancelled(_)
            | CoreError::InvalidTransition { .. } => ErrorKind::Conflict,
            CoreError::HoldExpired(_) => ErrorKind::Expired,
            CoreError::InvalidSignature
            | CoreError::PaymentDeclined(_)
            | CoreError::GatewayUnavailable(_)
            | CoreError::PaymentAttemptsExhausted(_) => ErrorKind::ExternalFailure,
            CoreError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            CoreError::ValidationError(_) => ErrorKind::Validation,
            CoreError::NotOwner(_) => ErrorKind::Forbidden,
            CoreError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Payment failures the user may retry without giving up the hold.
    pub fn is_retryable_payment_failure(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidSignature | CoreError::PaymentDeclined(_) | CoreError::GatewayUnavailable(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
