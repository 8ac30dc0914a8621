//! Content-keyed blob store contract, SQLite implementation and upload
//! validation.
//!
//! # Responsibility
//! - Map opaque string keys to binary payloads in the `images` and
//!   `attachment_files` tables.
//! - Reject uploads outside the configured kind allow-lists and size caps
//!   before anything is stored.
//!
//! # Invariants
//! - Keys carry no structural relationship to document identity.
//! - `store` on an existing key replaces its payload and timestamp.
//! - Validation failures are returned as values, never panics.

use crate::config::EditorConfig;
use crate::model::blob::{BlobKind, FileUpload, StoredBlob};
use crate::repo::common::{ensure_connection_ready, StoreResult};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

const BLOB_COLUMNS: &[&str] = &["id", "payload", "timestamp"];

/// Durable key to payload mapping shared by all open tabs.
pub trait BlobStore {
    /// Stores `payload` under `key`, replacing any previous payload.
    fn store(&self, kind: BlobKind, key: &str, payload: &[u8]) -> StoreResult<()>;
    fn get(&self, kind: BlobKind, key: &str) -> StoreResult<Option<StoredBlob>>;
    /// Returns whether a record was removed.
    fn delete(&self, kind: BlobKind, key: &str) -> StoreResult<bool>;
    fn exists(&self, kind: BlobKind, key: &str) -> StoreResult<bool>;
    /// Lists stored keys sorted ascending.
    fn keys(&self, kind: BlobKind) -> StoreResult<Vec<String>>;
}

/// SQLite-backed blob store.
pub struct SqliteBlobStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBlobStore<'conn> {
    /// Constructs a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(
            conn,
            &[("images", BLOB_COLUMNS), ("attachment_files", BLOB_COLUMNS)],
        )?;
        Ok(Self { conn })
    }
}

impl BlobStore for SqliteBlobStore<'_> {
    fn store(&self, kind: BlobKind, key: &str, payload: &[u8]) -> StoreResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {table} (id, payload, timestamp)
                 VALUES (?1, ?2, (strftime('%s', 'now') * 1000))
                 ON CONFLICT(id) DO UPDATE SET
                    payload = excluded.payload,
                    timestamp = excluded.timestamp;",
                table = kind.table()
            ),
            params![key, payload],
        )?;
        debug!(
            "event=blob_store module=blob status=ok kind={} key={} bytes={}",
            kind,
            key,
            payload.len()
        );
        Ok(())
    }

    fn get(&self, kind: BlobKind, key: &str) -> StoreResult<Option<StoredBlob>> {
        let blob = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, payload, timestamp FROM {} WHERE id = ?1;",
                    kind.table()
                ),
                [key],
                |row| {
                    Ok(StoredBlob {
                        key: row.get("id")?,
                        payload: row.get("payload")?,
                        timestamp: row.get("timestamp")?,
                    })
                },
            )
            .optional()?;
        Ok(blob)
    }

    fn delete(&self, kind: BlobKind, key: &str) -> StoreResult<bool> {
        let changed = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1;", kind.table()),
            [key],
        )?;
        debug!(
            "event=blob_delete module=blob status=ok kind={} key={} removed={}",
            kind,
            key,
            changed > 0
        );
        Ok(changed > 0)
    }

    fn exists(&self, kind: BlobKind, key: &str) -> StoreResult<bool> {
        let exists: i64 = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1);",
                kind.table()
            ),
            [key],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn keys(&self, kind: BlobKind) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM {} ORDER BY id ASC;", kind.table()))?;
        let mut rows = stmt.query([])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }
}

/// Upload rejected before storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobValidationError {
    EmptyPayload,
    TooLarge { size: u64, max: u64 },
    /// Declared or sniffed MIME type is not allow-listed for images.
    UnsupportedImageType(String),
    /// Declared MIME type does not match the payload signature.
    MimeMismatch { declared: String, detected: String },
    /// File extension is not allow-listed for attachment files.
    UnsupportedFileType(String),
}

impl Display for BlobValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPayload => write!(f, "file is empty"),
            Self::TooLarge { size, max } => {
                write!(f, "file is {size} bytes; the limit is {max} bytes")
            }
            Self::UnsupportedImageType(kind) => write!(f, "unsupported image type `{kind}`"),
            Self::MimeMismatch { declared, detected } => write!(
                f,
                "file declared as `{declared}` but its content looks like `{detected}`"
            ),
            Self::UnsupportedFileType(extension) => {
                write!(f, "unsupported file type `{extension}`")
            }
        }
    }
}

impl Error for BlobValidationError {}

/// Checks an upload against the allow-list and size cap for `kind`.
pub fn validate_upload(
    upload: &FileUpload,
    kind: BlobKind,
    config: &EditorConfig,
) -> Result<(), BlobValidationError> {
    if upload.payload.is_empty() {
        return Err(BlobValidationError::EmptyPayload);
    }

    let size = upload.payload.len() as u64;
    let max = match kind {
        BlobKind::Image => config.image_max_bytes,
        BlobKind::AttachmentFile => config.attachment_max_bytes,
    };
    if size > max {
        return Err(BlobValidationError::TooLarge { size, max });
    }

    match kind {
        BlobKind::Image => validate_image(upload, config),
        BlobKind::AttachmentFile => validate_attachment(upload, config),
    }
}

fn validate_image(upload: &FileUpload, config: &EditorConfig) -> Result<(), BlobValidationError> {
    let detected = sniff_image_mime(&upload.payload)
        .ok_or_else(|| BlobValidationError::UnsupportedImageType("unknown".to_string()))?;

    if let Some(declared) = upload.mime_type.as_deref() {
        let declared = declared.trim().to_ascii_lowercase();
        if !is_allowed(&config.image_mime_types, &declared) {
            return Err(BlobValidationError::UnsupportedImageType(declared));
        }
        if declared != detected && !(declared == "image/jpg" && detected == "image/jpeg") {
            return Err(BlobValidationError::MimeMismatch {
                declared,
                detected: detected.to_string(),
            });
        }
    }

    if !is_allowed(&config.image_mime_types, detected) {
        return Err(BlobValidationError::UnsupportedImageType(
            detected.to_string(),
        ));
    }
    Ok(())
}

fn validate_attachment(
    upload: &FileUpload,
    config: &EditorConfig,
) -> Result<(), BlobValidationError> {
    let extension = file_extension(&upload.file_name).unwrap_or_default();
    if extension.is_empty() || !is_allowed(&config.attachment_extensions, &extension) {
        return Err(BlobValidationError::UnsupportedFileType(extension));
    }
    Ok(())
}

fn is_allowed(allow_list: &[String], value: &str) -> bool {
    allow_list
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(value))
}

/// Lower-case extension of `file_name`, without the dot.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, extension) = file_name.trim().rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Detects an image MIME type from its leading bytes.
pub fn sniff_image_mime(payload: &[u8]) -> Option<&'static str> {
    if payload.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if payload.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if payload.starts_with(b"GIF87a") || payload.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if payload.len() >= 12 && payload.starts_with(b"RIFF") && &payload[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    // The cut may split a multibyte character.
    let head = String::from_utf8_lossy(&payload[..payload.len().min(512)]);
    let trimmed = head.trim_start();
    if trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && head.contains("<svg")) {
        return Some("image/svg+xml");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn png_upload_with_matching_mime_is_accepted() {
        let upload = FileUpload::new("shot.png", Some("image/png"), PNG_HEADER);
        assert_eq!(
            validate_upload(&upload, BlobKind::Image, &EditorConfig::default()),
            Ok(())
        );
    }

    #[test]
    fn declared_mime_must_match_signature() {
        let upload = FileUpload::new("shot.gif", Some("image/gif"), PNG_HEADER);
        let err = validate_upload(&upload, BlobKind::Image, &EditorConfig::default()).unwrap_err();
        assert!(matches!(err, BlobValidationError::MimeMismatch { .. }));
    }

    #[test]
    fn oversized_image_is_rejected() {
        let config = EditorConfig {
            image_max_bytes: 4,
            ..EditorConfig::default()
        };
        let upload = FileUpload::new("shot.png", None, PNG_HEADER);
        let err = validate_upload(&upload, BlobKind::Image, &config).unwrap_err();
        assert_eq!(err, BlobValidationError::TooLarge { size: 10, max: 4 });
    }

    #[test]
    fn attachment_extension_must_be_allow_listed() {
        let config = EditorConfig::default();
        let script = FileUpload::new("deploy.SH", None, b"#!/bin/sh\n".to_vec());
        assert_eq!(
            validate_upload(&script, BlobKind::AttachmentFile, &config),
            Ok(())
        );

        let unknown = FileUpload::new("payload.dmg", None, b"x".to_vec());
        assert_eq!(
            validate_upload(&unknown, BlobKind::AttachmentFile, &config),
            Err(BlobValidationError::UnsupportedFileType("dmg".to_string()))
        );
    }

    #[test]
    fn svg_is_detected_from_text() {
        assert_eq!(
            sniff_image_mime(b"<?xml version=\"1.0\"?><svg></svg>"),
            Some("image/svg+xml")
        );
        assert_eq!(sniff_image_mime(b"plain text"), None);
    }

    #[test]
    fn svg_with_multibyte_text_at_sniff_boundary_is_detected() {
        let mut svg = String::from("<svg xmlns=\"http://www.w3.org/2000/svg\"><title>");
        while svg.len() < 511 {
            svg.push('a');
        }
        svg.push('\u{e9}');
        svg.push_str("</title></svg>");
        assert!(!svg.is_char_boundary(512));

        assert_eq!(sniff_image_mime(svg.as_bytes()), Some("image/svg+xml"));
    }
}
