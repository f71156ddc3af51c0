//! Schema upgrades for the user and API counter tables.
//!
//! The schema version lives in SQLite's `user_version` pragma. Step `n` in
//! [`SCHEMA_STEPS`] upgrades the database from version `n` to `n + 1`.

use libsql::Connection;

use crate::error::DatabaseError;

/// Ordered upgrade steps. Append only.
const SCHEMA_STEPS: &[(&str, &str)] = &[
    (
        "users",
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            dialog_id INTEGER,
            lang TEXT,
            city TEXT,
            latitude REAL,
            longitude REAL,
            units TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_users_units ON users(units);",
    ),
    (
        "awaiting_city marker",
        "ALTER TABLE users ADD COLUMN awaiting_city INTEGER NOT NULL DEFAULT 0;",
    ),
    (
        "api_request_counters",
        "CREATE TABLE IF NOT EXISTS api_request_counters (
            month TEXT PRIMARY KEY,
            counter INTEGER NOT NULL DEFAULT 0
        );",
    ),
];

/// Latest schema version this build knows about.
pub fn latest_version() -> i64 {
    SCHEMA_STEPS.len() as i64
}

/// Bring the database up to [`latest_version`].
///
/// A database written by a newer build is refused rather than downgraded.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn).await?;
    let latest = latest_version();
    if current > latest {
        return Err(DatabaseError::Migration(format!(
            "database schema v{current} is newer than supported v{latest}"
        )));
    }

    for (index, (label, sql)) in SCHEMA_STEPS.iter().enumerate().skip(current as usize) {
        let target = index as i64 + 1;
        tracing::info!(version = target, step = label, "Upgrading schema");
        // PRAGMA does not take bound parameters.
        let batch = format!("BEGIN;\n{sql}\nPRAGMA user_version = {target};\nCOMMIT;");
        if let Err(e) = conn.execute_batch(&batch).await {
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::Migration(format!(
                "schema v{target} ({label}): {e}"
            )));
        }
    }

    if current < latest {
        tracing::info!(from = current, to = latest, "Schema upgraded");
    }
    Ok(())
}

/// Current `user_version`, 0 for a fresh database.
pub async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("PRAGMA user_version", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("reading schema version: {e}")))?;
    let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("reading schema version: {e}")))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(|e| DatabaseError::Migration(format!("parsing schema version: {e}")))
}
