//! libSQL backend for [`UserStore`]: a local file in production, an
//! in-memory database in tests.

use std::path::Path;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::model::{EnrolledUser, MessageId, UnitSystem, User, UserId};
use crate::store::migrations;
use crate::store::traits::{ENROLLED_PREDICATE, UserStore};

/// [`UserStore`] over one libSQL connection, shared by every task.
pub struct LibSqlBackend {
    // Never read. Holding it keeps the database open for `conn`; an
    // in-memory database disappears with its last handle.
    _db: LibSqlDatabase,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) the database file at `path`, creating parent
    /// directories, and bring the schema up to date.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("creating {}: {e}", parent.display()))
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("opening {}: {e}", path.display())))?;
        let backend = Self::open(db).await?;
        info!(path = %path.display(), "User database ready");
        Ok(backend)
    }

    /// Throwaway database that lives as long as the backend.
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("opening in-memory database: {e}")))?;
        Self::open(db).await
    }

    async fn open(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("connecting to libSQL database: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self { _db: db, conn })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, dialog_id, lang, city, latitude, longitude, units, awaiting_city";

fn opt_text(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        _ => None,
    }
}

fn opt_integer(value: Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(i),
        _ => None,
    }
}

fn opt_real(value: Value) -> Option<f64> {
    match value {
        Value::Real(f) => Some(f),
        Value::Integer(i) => Some(i as f64),
        _ => None,
    }
}

/// Map a libsql Row to a User. Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let column = |idx: i32| {
        row.get_value(idx)
            .map_err(|e| DatabaseError::Query(format!("user row column {idx}: {e}")))
    };

    let id: i64 = opt_integer(column(0)?)
        .ok_or_else(|| DatabaseError::Serialization("user row without id".into()))?;
    let units = match opt_text(column(6)?) {
        Some(raw) => Some(
            raw.parse::<UnitSystem>()
                .map_err(DatabaseError::Serialization)?,
        ),
        None => None,
    };

    Ok(User {
        id: UserId(id),
        dialog_message_id: opt_integer(column(1)?).map(MessageId),
        lang: opt_text(column(2)?),
        city: opt_text(column(3)?),
        latitude: opt_real(column(4)?),
        longitude: opt_real(column(5)?),
        units,
        awaiting_city: opt_integer(column(7)?).unwrap_or(0) != 0,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl UserStore for LibSqlBackend {
    async fn create_or_reset_user(&self, id: UserId) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO users (id) VALUES (?1)
                 ON CONFLICT (id) DO UPDATE SET
                    dialog_id = NULL, lang = NULL, city = NULL, latitude = NULL,
                    longitude = NULL, units = NULL, awaiting_city = 0,
                    updated_at = datetime('now')",
                params![id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_or_reset_user: {e}")))?;

        debug!(user_id = %id, "User row created or reset");
        Ok(())
    }

    async fn set_dialog_message_id(
        &self,
        id: UserId,
        message_id: MessageId,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO users (id, dialog_id) VALUES (?1, ?2)
                 ON CONFLICT (id) DO UPDATE SET dialog_id = excluded.dialog_id,
                    updated_at = datetime('now')",
                params![id.0, message_id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_dialog_message_id: {e}")))?;
        Ok(())
    }

    async fn get_dialog_message_id(&self, id: UserId) -> Result<Option<MessageId>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT dialog_id FROM users WHERE id = ?1", params![id.0])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_dialog_message_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value = row
                    .get_value(0)
                    .map_err(|e| DatabaseError::Query(format!("get_dialog_message_id: {e}")))?;
                Ok(opt_integer(value).map(MessageId))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_dialog_message_id: {e}"))),
        }
    }

    async fn replace_dialog_message_id(
        &self,
        id: UserId,
        expected: Option<MessageId>,
        message_id: MessageId,
    ) -> Result<bool, DatabaseError> {
        let expected = expected.map_or(Value::Null, |m| Value::Integer(m.0));
        let count = self
            .conn()
            .execute(
                &format!(
                    "UPDATE users SET dialog_id = ?1, updated_at = datetime('now')
                     WHERE id = ?2 AND dialog_id IS ?3 AND {ENROLLED_PREDICATE}"
                ),
                params![message_id.0, id.0, expected],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_dialog_message_id: {e}")))?;
        Ok(count == 1)
    }

    async fn set_city_and_coords(
        &self,
        id: UserId,
        city: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE users SET city = ?1, latitude = ?2, longitude = ?3,
                    updated_at = datetime('now')
                 WHERE id = ?4",
                params![city, latitude, longitude, id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_city_and_coords: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_language_and_units(
        &self,
        id: UserId,
        lang: &str,
        units: UnitSystem,
    ) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE users SET lang = ?1, units = ?2, updated_at = datetime('now')
                 WHERE id = ?3",
                params![lang, units.as_str(), id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_language_and_units: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_awaiting_city(&self, id: UserId, awaiting: bool) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE users SET awaiting_city = ?1 WHERE id = ?2",
                params![i64::from(awaiting), id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_awaiting_city: {e}")))?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn list_enrolled_users(&self) -> Result<Vec<EnrolledUser>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {ENROLLED_PREDICATE} ORDER BY id"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_enrolled_users: {e}")))?;

        let mut users = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_enrolled_users: {e}")))?
        {
            let user = row_to_user(&row)?;
            match user.enrolled() {
                Some(enrolled) => users.push(enrolled),
                None => warn!(user_id = %user.id, "Enrolled user without a location, skipping"),
            }
        }
        Ok(users)
    }

    async fn delete_user(&self, id: UserId) -> Result<Option<MessageId>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "DELETE FROM users WHERE id = ?1 RETURNING dialog_id",
                params![id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_user: {e}")))?;

        let last_dialog = match rows.next().await {
            Ok(Some(row)) => row
                .get_value(0)
                .map_err(|e| DatabaseError::Query(format!("delete_user: {e}")))
                .map(|v| opt_integer(v).map(MessageId))?,
            Ok(None) => None,
            Err(e) => return Err(DatabaseError::Query(format!("delete_user: {e}"))),
        };

        debug!(user_id = %id, "User row deleted");
        Ok(last_dialog)
    }

    async fn count_users(&self) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM users", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_users: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("count_users: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_users: {e}"))),
        }
    }

    async fn increase_api_counter(&self, month: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO api_request_counters (month, counter) VALUES (?1, 1)
                 ON CONFLICT (month) DO UPDATE SET counter = counter + 1",
                params![month],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increase_api_counter: {e}")))?;
        Ok(())
    }

    async fn get_api_counter_value(&self, month: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT counter FROM api_request_counters WHERE month = ?1",
                params![month],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_api_counter_value: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("get_api_counter_value: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("get_api_counter_value: {e}"))),
        }
    }
}
