//! Onboarding dialog: session states, the manager that runs each step, and
//! the router the transport feeds updates into.

pub mod manager;
pub mod router;
pub mod state;
pub mod texts;

pub use manager::DialogManager;
pub use router::{DialogRouter, Handler, register_handlers};
pub use state::{InputShape, Session, SessionState};
