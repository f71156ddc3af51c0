//! Outbound side of the messaging platform.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::channels::markup::Markup;
use crate::error::DeliveryError;
use crate::model::{MessageId, UserId};

/// A photo with a caption, optionally carrying reply markup.
#[derive(Debug, Clone)]
pub struct PhotoMessage {
    pub photo: PathBuf,
    pub caption: String,
    pub markup: Option<Markup>,
    /// Deliver without a notification sound.
    pub silent: bool,
}

impl PhotoMessage {
    pub fn new(photo: impl AsRef<Path>, caption: impl Into<String>) -> Self {
        Self {
            photo: photo.as_ref().to_path_buf(),
            caption: caption.into(),
            markup: None,
            silent: false,
        }
    }

    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.markup = Some(markup);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Calls the bot makes against the platform.
///
/// Every user talks to the bot in a private chat, so the chat is addressed
/// by the user's id.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a photo message and return its id.
    async fn send_photo(
        &self,
        chat: UserId,
        message: PhotoMessage,
    ) -> Result<MessageId, DeliveryError>;

    /// Send a plain text message and return its id.
    async fn send_text(&self, chat: UserId, text: &str) -> Result<MessageId, DeliveryError>;

    /// Delete a message. Fails with [`DeliveryError::MessageGone`] when the
    /// message no longer exists or is too old to delete.
    async fn delete_message(&self, chat: UserId, message: MessageId) -> Result<(), DeliveryError>;

    /// Acknowledge a button press so the client stops its spinner.
    async fn answer_callback(&self, query_id: &str) -> Result<(), DeliveryError>;
}
