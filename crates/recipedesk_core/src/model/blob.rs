//! Blob identity types shared by the store, the naming resolver and
//! import/export.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Logical table a blob lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    /// Step or document-level image (`images` table).
    Image,
    /// Downloadable file (`attachment_files` table).
    AttachmentFile,
}

impl BlobKind {
    /// Backing SQLite table name.
    pub fn table(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::AttachmentFile => "attachment_files",
        }
    }

    /// Sub-folder used inside an archive document folder.
    pub fn archive_dir(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::AttachmentFile => "downloadExecutables",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::AttachmentFile => "attachment_file",
        }
    }
}

impl Display for BlobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(kind, key)` pair naming one blob.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub kind: BlobKind,
    pub key: String,
}

impl BlobRef {
    pub fn new(kind: BlobKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn image(key: impl Into<String>) -> Self {
        Self::new(BlobKind::Image, key)
    }

    pub fn file(key: impl Into<String>) -> Self {
        Self::new(BlobKind::AttachmentFile, key)
    }
}

impl Display for BlobRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// One record of the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: String,
    pub payload: Vec<u8>,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

/// Raw user-supplied file before validation and naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Original file name, used for attachment keys and extension checks.
    pub file_name: String,
    /// Declared MIME type, when the adapter knows it.
    pub mime_type: Option<String>,
    pub payload: Vec<u8>,
}

impl FileUpload {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: Option<&str>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.map(str::to_string),
            payload: payload.into(),
        }
    }
}
