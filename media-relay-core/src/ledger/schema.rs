//! Ledger schema definitions and migrations.

use rusqlite::Connection;

use crate::error::LedgerError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS media_items (
    account_id TEXT NOT NULL,
    media_id TEXT NOT NULL,
    media_kind TEXT,
    caption TEXT,
    permalink TEXT,
    taken_at INTEGER NOT NULL,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    published_at INTEGER,
    remote_post_id INTEGER,
    remote_link TEXT,
    PRIMARY KEY (account_id, media_id)
);

CREATE INDEX IF NOT EXISTS idx_media_items_pending ON media_items(account_id, published_at, taken_at);
"#;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, LedgerError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), LedgerError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the ledger schema. Safe to call on every open.
pub(crate) fn migrate(conn: &Connection) -> Result<(), LedgerError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(LedgerError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA_V1)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!(version = SCHEMA_VERSION, "[LEDGER] Initialized schema");
    }

    Ok(())
}
