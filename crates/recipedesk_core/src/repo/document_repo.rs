//! Saved document repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist saved recipe documents keyed by their stable id.
//! - Keep JSON encoding of the document body inside the storage boundary.
//!
//! # Invariants
//! - Saving an existing id replaces the stored body (last writer wins).
//! - Listing is deterministic: `updated_at DESC, id ASC`.

use crate::model::document::Document;
use crate::repo::common::{ensure_connection_ready, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const DOCUMENT_COLUMNS: &[&str] = &["id", "title", "body", "updated_at"];

/// Read model for one saved document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDocument {
    pub id: String,
    pub title: String,
    pub document: Document,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

/// Repository interface for saved documents.
pub trait DocumentRepository {
    /// Inserts or replaces the document stored under `id`.
    fn save_document(&self, id: &str, document: &Document) -> StoreResult<()>;
    fn get_document(&self, id: &str) -> StoreResult<Option<SavedDocument>>;
    fn list_documents(&self) -> StoreResult<Vec<SavedDocument>>;
    fn delete_document(&self, id: &str) -> StoreResult<bool>;
}

/// SQLite-backed document repository.
pub struct SqliteDocumentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDocumentRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(conn, &[("documents", DOCUMENT_COLUMNS)])?;
        Ok(Self { conn })
    }
}

impl DocumentRepository for SqliteDocumentRepository<'_> {
    fn save_document(&self, id: &str, document: &Document) -> StoreResult<()> {
        let mut stored = document.sanitized_for_export();
        stored.id = Some(id.to_string());
        let body = serde_json::to_string(&stored).map_err(StoreError::Encode)?;

        self.conn.execute(
            "INSERT INTO documents (id, title, body, updated_at)
             VALUES (?1, ?2, ?3, (strftime('%s', 'now') * 1000))
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                body = excluded.body,
                updated_at = excluded.updated_at;",
            params![id, stored.title.as_str(), body],
        )?;
        Ok(())
    }

    fn get_document(&self, id: &str) -> StoreResult<Option<SavedDocument>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, body, updated_at FROM documents WHERE id = ?1;",
                [id],
                read_raw_row,
            )
            .optional()?;
        row.map(decode_row).transpose()
    }

    fn list_documents(&self) -> StoreResult<Vec<SavedDocument>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, body, updated_at
             FROM documents
             ORDER BY updated_at DESC, id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(decode_row(read_raw_row(row)?)?);
        }
        Ok(documents)
    }

    fn delete_document(&self, id: &str) -> StoreResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM documents WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

struct RawDocumentRow {
    id: String,
    title: String,
    body: String,
    updated_at: i64,
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawDocumentRow> {
    Ok(RawDocumentRow {
        id: row.get("id")?,
        title: row.get("title")?,
        body: row.get("body")?,
        updated_at: row.get("updated_at")?,
    })
}

fn decode_row(raw: RawDocumentRow) -> StoreResult<SavedDocument> {
    let document: Document = serde_json::from_str(&raw.body).map_err(|err| {
        StoreError::InvalidData(format!("documents.body for `{}`: {err}", raw.id))
    })?;
    Ok(SavedDocument {
        id: raw.id,
        title: raw.title,
        document,
        updated_at: raw.updated_at,
    })
}
