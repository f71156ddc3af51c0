//! Scheduled broadcast of refreshed forecasts.

pub mod scheduler;
pub mod ticker;

pub use scheduler::{BroadcastReport, BroadcastScheduler, DeliveryOutcome, SessionProbe};
pub use ticker::register_scheduled_job;
