//! `UserStore` trait: the operation contract the dialog and the broadcast
//! use. Backends live next to this file.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{EnrolledUser, MessageId, UnitSystem, User, UserId};

/// SQL form of [`User::is_enrolled`]. Every query that filters broadcast
/// recipients must use this fragment.
pub const ENROLLED_PREDICATE: &str = "units IS NOT NULL";

/// Backend-agnostic user persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a bare row for `id`, or wipe every field of an existing row.
    async fn create_or_reset_user(&self, id: UserId) -> Result<(), DatabaseError>;

    /// Remember the dialog message currently visible in the user's chat.
    /// Creates the row if it does not exist.
    async fn set_dialog_message_id(
        &self,
        id: UserId,
        message_id: MessageId,
    ) -> Result<(), DatabaseError>;

    async fn get_dialog_message_id(&self, id: UserId) -> Result<Option<MessageId>, DatabaseError>;

    /// Swap the tracked dialog message only if the row is still enrolled and
    /// still tracks `expected`. Never creates a row. Returns whether the
    /// swap happened.
    async fn replace_dialog_message_id(
        &self,
        id: UserId,
        expected: Option<MessageId>,
        message_id: MessageId,
    ) -> Result<bool, DatabaseError>;

    async fn set_city_and_coords(
        &self,
        id: UserId,
        city: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), DatabaseError>;

    async fn set_language_and_units(
        &self,
        id: UserId,
        lang: &str,
        units: UnitSystem,
    ) -> Result<(), DatabaseError>;

    /// Persist or clear the `AwaitingCityName` marker.
    async fn set_awaiting_city(&self, id: UserId, awaiting: bool) -> Result<(), DatabaseError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, DatabaseError>;

    /// All broadcast recipients (see [`ENROLLED_PREDICATE`]).
    async fn list_enrolled_users(&self) -> Result<Vec<EnrolledUser>, DatabaseError>;

    /// Remove the row entirely and return the dialog message it was
    /// tracking. Deleting a missing row is not an error.
    async fn delete_user(&self, id: UserId) -> Result<Option<MessageId>, DatabaseError>;

    /// Number of rows, enrolled or not.
    async fn count_users(&self) -> Result<i64, DatabaseError>;

    /// Add one weather API request to the counter for `month`.
    async fn increase_api_counter(&self, month: &str) -> Result<(), DatabaseError>;

    /// Requests counted for `month`, 0 when none were.
    async fn get_api_counter_value(&self, month: &str) -> Result<i64, DatabaseError>;
}
