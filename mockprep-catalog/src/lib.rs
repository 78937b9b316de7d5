pub mod availability;
pub mod service;

pub use availability::{AvailabilityStore, DateRange};
pub use service::Catalog;
