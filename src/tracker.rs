//! Message lifecycle tracking.
//!
//! Each user sees at most one bot-authored dialog message. Its id lives on
//! the user row. Deletions are best-effort: a message that is already gone
//! is not an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::channels::Messenger;
use crate::error::DatabaseError;
use crate::model::{MessageId, UserId};
use crate::store::UserStore;

/// Per-user pointer to the visible dialog message.
#[derive(Clone)]
pub struct MessageTracker {
    store: Arc<dyn UserStore>,
    messenger: Arc<dyn Messenger>,
}

impl MessageTracker {
    pub fn new(store: Arc<dyn UserStore>, messenger: Arc<dyn Messenger>) -> Self {
        Self { store, messenger }
    }

    pub async fn get(&self, user: UserId) -> Result<Option<MessageId>, DatabaseError> {
        self.store.get_dialog_message_id(user).await
    }

    pub async fn set(&self, user: UserId, message: MessageId) -> Result<(), DatabaseError> {
        self.store.set_dialog_message_id(user, message).await
    }

    /// Track `message` only if the user is still enrolled and still tracks
    /// `expected`. Returns whether the swap happened.
    ///
    /// Background writers use this so they never recreate a stopped user
    /// or overwrite a prompt sent after they read `expected`.
    pub async fn replace(
        &self,
        user: UserId,
        expected: Option<MessageId>,
        message: MessageId,
    ) -> Result<bool, DatabaseError> {
        self.store
            .replace_dialog_message_id(user, expected, message)
            .await
    }

    /// Delete the tracked message, if any, and return its id.
    ///
    /// The stored id is left in place; the caller overwrites it with the
    /// replacement.
    pub async fn discard_previous(&self, user: UserId) -> Result<Option<MessageId>, DatabaseError> {
        let previous = self.get(user).await?;
        if let Some(message) = previous {
            delete_quietly(self.messenger.as_ref(), user, message).await;
        }
        Ok(previous)
    }

    /// Best-effort deletion of any message in the user's chat.
    pub async fn delete(&self, user: UserId, message: MessageId) {
        delete_quietly(self.messenger.as_ref(), user, message).await;
    }

    /// Delete `message` after `delay` unless cancelled first.
    pub fn delete_later(&self, user: UserId, message: MessageId, delay: Duration) -> PendingDeletion {
        PendingDeletion::schedule(self.messenger.clone(), user, message, delay)
    }
}

/// Delete a message, logging failures instead of returning them.
pub async fn delete_quietly(messenger: &dyn Messenger, chat: UserId, message: MessageId) {
    match messenger.delete_message(chat, message).await {
        Ok(()) => {}
        Err(e) if e.is_gone() => {
            tracing::debug!(user_id = %chat, message_id = %message, "Message already gone");
        }
        Err(e) => {
            tracing::warn!(user_id = %chat, message_id = %message, "Failed to delete message: {e}");
        }
    }
}

/// A one-shot delayed deletion of a self-destructing message.
///
/// Dropping the handle does not cancel the deletion.
pub struct PendingDeletion {
    chat: UserId,
    message: MessageId,
    messenger: Arc<dyn Messenger>,
    handle: JoinHandle<()>,
}

impl PendingDeletion {
    fn schedule(
        messenger: Arc<dyn Messenger>,
        chat: UserId,
        message: MessageId,
        delay: Duration,
    ) -> Self {
        let task_messenger = messenger.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            delete_quietly(task_messenger.as_ref(), chat, message).await;
        });
        Self {
            chat,
            message,
            messenger,
            handle,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the timer. The message stays.
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Abort the timer and delete the message right away, unless the timer
    /// already did.
    pub async fn flush(self) {
        if self.handle.is_finished() {
            return;
        }
        self.handle.abort();
        delete_quietly(self.messenger.as_ref(), self.chat, self.message).await;
    }
}
