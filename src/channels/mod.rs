//! Messaging platform abstraction: inbound updates, outbound calls, and
//! keyboard markup.

pub mod markup;
pub mod messenger;
pub mod update;

pub use markup::{Button, CallbackData, Markup};
pub use messenger::{Messenger, PhotoMessage};
pub use update::{Command, Input, Update, UpdatePayload};
