//! Weather bot core: onboarding dialog and scheduled forecast broadcast.

pub mod admin;
pub mod app;
pub mod broadcast;
pub mod channels;
pub mod config;
pub mod dialog;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod weather;
