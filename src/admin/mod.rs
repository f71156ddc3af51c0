//! Operator-facing HTTP surface.

pub mod routes;

pub use routes::{AdminRouteState, admin_routes};
