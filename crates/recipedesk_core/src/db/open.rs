//! Opening the recipe store.
//!
//! Both entry points funnel through [`open_store`], which connects, sets the
//! busy timeout used while autosave and import share the file, and upgrades
//! the schema before the connection is returned.

use super::migrations::{apply_migrations, schema_version};
use super::{DbError, DbResult};
use log::{debug, error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

enum StoreLocation<'a> {
    File(&'a Path),
    Memory,
}

impl StoreLocation<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        match self {
            Self::File(path) => Connection::open(path),
            Self::Memory => Connection::open_in_memory(),
        }
    }
}

/// Opens (or creates) the store file at `path`.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_store(StoreLocation::File(path.as_ref()))
}

/// Opens a throwaway store; used by tests and dry-run imports.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_store(StoreLocation::Memory)
}

fn open_store(location: StoreLocation<'_>) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = location.label();

    let opened = location.connect().map_err(DbError::from).and_then(prepare);

    match &opened {
        Ok(conn) => info!(
            "event=store_open module=db status=ok mode={} schema={} duration_ms={}",
            mode,
            schema_version(conn).unwrap_or_default(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=store_open module=db status=error mode={} duration_ms={} error={}",
            mode,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    opened
}

fn prepare(mut conn: Connection) -> DbResult<Connection> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let applied = apply_migrations(&mut conn)?;
    if !applied.is_empty() {
        debug!(
            "event=store_upgrade module=db status=ok applied={:?}",
            applied
        );
    }
    Ok(conn)
}
