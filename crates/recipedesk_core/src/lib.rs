//! Core domain logic for the RecipeDesk local editor.
//! This crate is the single source of truth for editor invariants.

pub mod archive;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use archive::{read_tree, write_tree, ArchiveCodec, ArchiveEntry, ArchiveError};
pub use config::{ConfigError, EditorConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::blob::{BlobKind, BlobRef, FileUpload, StoredBlob};
pub use model::document::{
    AttachmentRef, ConfigEntry, Document, DocumentValidationError, MediaRef, RelatedLink, Step,
};
pub use model::tab::{PersistedSessionSnapshot, Tab, TabId};
pub use repo::blob_repo::{validate_upload, BlobStore, BlobValidationError, SqliteBlobStore};
pub use repo::common::{StoreError, StoreResult};
pub use repo::document_repo::{DocumentRepository, SavedDocument, SqliteDocumentRepository};
pub use repo::session_repo::{SessionRepository, SqliteSessionRepository};
pub use service::autosave::{Channel, Clock, ManualClock, SystemClock};
pub use service::naming::{ImageTarget, NamingResolver, ResolverReport};
pub use service::session::{
    CloseConfirmation, CloseOutcome, EditorSession, SaveAllReport, SaveOutcome, SessionError,
    SessionEvent, SessionResult, SqliteEditorSession,
};
pub use service::transfer::{
    ExportReport, ExportStage, ImportFile, ImportReport, TransferError, TransferResult,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
