//! Persistence layer: user rows behind the `UserStore` trait.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ENROLLED_PREDICATE, UserStore};
