//! Recurring-schedule and slot-reconciliation engine for a trail-booking
//! platform. Start rules expand into a year of bookable slots, closures
//! suppress them, and team bookings occupy them, all through an external
//! storage collaborator and without ever silently destroying a sold slot.

pub mod clock;
pub mod engine;
pub mod model;
pub mod notify;
pub mod observability;
pub mod recurrence;
pub mod store;
pub mod trigger;

pub use engine::{Engine, EngineError};
