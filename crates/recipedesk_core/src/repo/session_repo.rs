//! Persisted session snapshot storage.
//!
//! The snapshot lives in the local key-value table under one fixed key and
//! is overwritten on every autosave.

use crate::model::tab::PersistedSessionSnapshot;
use crate::repo::common::{ensure_connection_ready, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};

/// Key-value entry holding the open tab list.
pub const SESSION_SNAPSHOT_KEY: &str = "editor.session";

const KV_COLUMNS: &[&str] = &["key", "value", "updated_at"];

pub trait SessionRepository {
    fn save_snapshot(&self, snapshot: &PersistedSessionSnapshot) -> StoreResult<()>;
    fn load_snapshot(&self) -> StoreResult<Option<PersistedSessionSnapshot>>;
    fn clear_snapshot(&self) -> StoreResult<()>;
}

pub struct SqliteSessionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSessionRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(conn, &[("kv_entries", KV_COLUMNS)])?;
        Ok(Self { conn })
    }
}

impl SessionRepository for SqliteSessionRepository<'_> {
    fn save_snapshot(&self, snapshot: &PersistedSessionSnapshot) -> StoreResult<()> {
        let value = serde_json::to_string(snapshot).map_err(StoreError::Encode)?;
        self.conn.execute(
            "INSERT INTO kv_entries (key, value, updated_at)
             VALUES (?1, ?2, (strftime('%s', 'now') * 1000))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![SESSION_SNAPSHOT_KEY, value],
        )?;
        Ok(())
    }

    fn load_snapshot(&self) -> StoreResult<Option<PersistedSessionSnapshot>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1;",
                [SESSION_SNAPSHOT_KEY],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|err| {
                    StoreError::InvalidData(format!("session snapshot cannot be decoded: {err}"))
                })
            })
            .transpose()
    }

    fn clear_snapshot(&self) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM kv_entries WHERE key = ?1;",
            [SESSION_SNAPSHOT_KEY],
        )?;
        Ok(())
    }
}
