pub mod flow;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod policy;
pub mod reservation;
pub mod validation;

pub use flow::{BookingFlow, FlowStage, FlowStore, MemoryFlowStore};
pub use gateway::HmacPaymentGateway;
pub use ledger::{BookingLedger, BookingOverview};
pub use orchestrator::BookingOrchestrator;
pub use policy::{BookingPolicy, DuplicateHoldPolicy};
pub use reservation::ReservationManager;
pub use validation::{is_valid_email, DetailsInput};
