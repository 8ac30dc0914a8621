//! Error type shared by the SQLite repositories, plus the schema probe each
//! of them runs in `try_new`.

use crate::db::migrations::{latest_version, schema_version};
use crate::db::DbError;
use rusqlite::Connection;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// Connection was not opened through `open_db`, or by another build.
    SchemaOutdated { expected: u32, found: u32 },
    /// Table (or one of its columns, when `column` is set) is absent.
    SchemaMismatch {
        table: &'static str,
        column: Option<&'static str>,
    },
    /// Stored row or snapshot could not be decoded.
    InvalidData(String),
    Encode(serde_json::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::SchemaOutdated { expected, found } => {
                write!(f, "store schema is {found}, repositories need {expected}")
            }
            Self::SchemaMismatch {
                table,
                column: None,
            } => write!(f, "store has no `{table}` table"),
            Self::SchemaMismatch {
                table,
                column: Some(column),
            } => write!(f, "store table `{table}` lacks column `{column}`"),
            Self::InvalidData(message) => write!(f, "unreadable stored data: {message}"),
            Self::Encode(err) => write!(f, "cannot serialize for storage: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(value.into())
    }
}

/// Fails unless `conn` is at the latest schema and has every listed column.
pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[(&'static str, &[&'static str])],
) -> StoreResult<()> {
    let expected = latest_version();
    let found = schema_version(conn)?;
    if found != expected {
        return Err(StoreError::SchemaOutdated { expected, found });
    }

    for &(table, columns) in tables {
        let present = column_names(conn, table)?;
        if present.is_empty() {
            return Err(StoreError::SchemaMismatch {
                table,
                column: None,
            });
        }
        if let Some(&column) = columns.iter().find(|column| !present.contains(**column)) {
            return Err(StoreError::SchemaMismatch {
                table,
                column: Some(column),
            });
        }
    }
    Ok(())
}

// Empty when the table does not exist.
fn column_names(conn: &Connection, table: &str) -> StoreResult<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1);")?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}
