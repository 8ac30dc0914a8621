//! Import and export of documents together with their blobs.
//!
//! # Responsibility
//! - Export saved documents as sanitized JSON, packed with the blobs they
//!   reference, while reporting discrete progress stages.
//! - Import a single document file or a whole archive into new tabs.
//!
//! # Invariants
//! - Exported documents never carry editor runtime fields.
//! - A malformed single document is rejected before any tab is created.
//! - Archive import never aborts on one bad entry; failures are collected
//!   and the missing-reference sweep runs after every entry was processed.

use crate::archive::{ArchiveCodec, ArchiveEntry, ArchiveError};
use crate::model::blob::{BlobKind, BlobRef, FileUpload};
use crate::model::document::{Document, DocumentValidationError};
use crate::model::tab::TabId;
use crate::repo::blob_repo::{file_extension, validate_upload, BlobStore};
use crate::repo::common::StoreError;
use crate::repo::document_repo::{DocumentRepository, SavedDocument};
use crate::repo::session_repo::SessionRepository;
use crate::service::session::EditorSession;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type TransferResult<T> = Result<T, TransferError>;

#[derive(Debug)]
pub enum TransferError {
    UnsupportedFileType(String),
    InvalidJson(serde_json::Error),
    InvalidDocument(DocumentValidationError),
    Encode(serde_json::Error),
    Archive(ArchiveError),
    Storage(StoreError),
}

impl Display for TransferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedFileType(name) => {
                write!(f, "unsupported import file `{name}`; expected .json or .zip")
            }
            Self::InvalidJson(err) => write!(f, "document file is not valid JSON: {err}"),
            Self::InvalidDocument(err) => write!(f, "document failed validation: {err}"),
            Self::Encode(err) => write!(f, "document cannot be encoded: {err}"),
            Self::Archive(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
        }
    }
}

impl Error for TransferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidJson(err) | Self::Encode(err) => Some(err),
            Self::InvalidDocument(err) => Some(err),
            Self::Archive(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::UnsupportedFileType(_) => None,
        }
    }
}

impl From<ArchiveError> for TransferError {
    fn from(value: ArchiveError) -> Self {
        Self::Archive(value)
    }
}

impl From<StoreError> for TransferError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

// Export

/// Progress of a bulk export, emitted in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStage {
    Collecting,
    DocumentPacked {
        index: usize,
        total: usize,
        document_id: String,
    },
    Encoding { entries: usize },
    Finished { documents: usize, bytes: usize },
}

/// A referenced blob that was absent from the store at export time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBlob {
    pub document_id: String,
    pub blob: BlobRef,
}

/// Archive entries for a set of saved documents, before encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportBundle {
    pub entries: Vec<ArchiveEntry>,
    pub documents: usize,
    pub missing: Vec<MissingBlob>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub archive: Vec<u8>,
    pub documents: usize,
    pub missing: Vec<MissingBlob>,
}

/// Serializes one document as pretty JSON without runtime fields.
pub fn export_document(document: &Document) -> TransferResult<String> {
    serde_json::to_string_pretty(&document.sanitized_for_export()).map_err(TransferError::Encode)
}

/// Packs every saved document and the blobs it references.
pub fn build_export<D, B>(
    documents: &D,
    blobs: &B,
    mut progress: impl FnMut(ExportStage),
) -> TransferResult<ExportBundle>
where
    D: DocumentRepository,
    B: BlobStore,
{
    progress(ExportStage::Collecting);
    let saved = documents.list_documents()?;
    let total = saved.len();
    let mut bundle = ExportBundle {
        documents: total,
        ..ExportBundle::default()
    };

    for (index, document) in saved.iter().enumerate() {
        pack_document(document, blobs, &mut bundle)?;
        progress(ExportStage::DocumentPacked {
            index,
            total,
            document_id: document.id.clone(),
        });
    }

    if !bundle.missing.is_empty() {
        warn!(
            "event=export_collect module=transfer status=ok documents={} missing={}",
            total,
            bundle.missing.len()
        );
    }
    Ok(bundle)
}

fn pack_document<B: BlobStore>(
    saved: &SavedDocument,
    blobs: &B,
    bundle: &mut ExportBundle,
) -> TransferResult<()> {
    let folder = saved.id.as_str();
    let mut document = saved.document.clone();
    document.id = Some(saved.id.clone());
    bundle.entries.push(ArchiveEntry::new(
        format!("{folder}/{folder}.json"),
        export_document(&document)?.into_bytes(),
    ));

    for blob in document.blob_refs() {
        match blobs.get(blob.kind, &blob.key)? {
            Some(stored) => bundle.entries.push(ArchiveEntry::new(
                format!("{folder}/{}/{}", blob.kind.archive_dir(), blob.key),
                stored.payload,
            )),
            None => bundle.missing.push(MissingBlob {
                document_id: saved.id.clone(),
                blob,
            }),
        }
    }
    Ok(())
}

/// Exports every saved document into one encoded archive.
pub fn export_all<D, B, C>(
    documents: &D,
    blobs: &B,
    codec: &C,
    mut progress: impl FnMut(ExportStage),
) -> TransferResult<ExportReport>
where
    D: DocumentRepository,
    B: BlobStore,
    C: ArchiveCodec,
{
    let bundle = build_export(documents, blobs, &mut progress)?;
    progress(ExportStage::Encoding {
        entries: bundle.entries.len(),
    });
    let archive = codec.encode(&bundle.entries)?;
    progress(ExportStage::Finished {
        documents: bundle.documents,
        bytes: archive.len(),
    });
    info!(
        "event=export_all module=transfer status=ok documents={} entries={} bytes={}",
        bundle.documents,
        bundle.entries.len(),
        archive.len()
    );
    Ok(ExportReport {
        archive,
        documents: bundle.documents,
        missing: bundle.missing,
    })
}

// Import

/// A file picked for import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    DocumentJson,
    Archive,
}

/// Archive entry that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub path: String,
    pub reason: String,
}

/// Imported reference whose payload is absent from the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMissing {
    pub tab_id: TabId,
    pub document_title: String,
    pub blob: BlobRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub tabs: Vec<TabId>,
    pub stored_blobs: Vec<BlobRef>,
    pub failures: Vec<ImportFailure>,
    pub missing: Vec<ReferenceMissing>,
}

/// Picks the import path from the file extension.
pub fn detect_format(file_name: &str) -> TransferResult<ImportFormat> {
    match file_extension(file_name).as_deref() {
        Some("json") => Ok(ImportFormat::DocumentJson),
        Some("zip") => Ok(ImportFormat::Archive),
        _ => Err(TransferError::UnsupportedFileType(file_name.to_string())),
    }
}

/// Parses and validates one document file.
pub fn parse_document(bytes: &[u8]) -> TransferResult<Document> {
    let document: Document = serde_json::from_slice(bytes).map_err(TransferError::InvalidJson)?;
    document
        .validate()
        .map_err(TransferError::InvalidDocument)?;
    Ok(document)
}

/// Imports a `.json` document or a `.zip` archive.
pub fn import_file<B, D, S, C>(
    session: &mut EditorSession<B, D, S>,
    file: &ImportFile,
    codec: &C,
) -> TransferResult<ImportReport>
where
    B: BlobStore,
    D: DocumentRepository,
    S: SessionRepository,
    C: ArchiveCodec,
{
    match detect_format(&file.file_name)? {
        ImportFormat::DocumentJson => import_document_json(session, &file.file_name, &file.bytes),
        ImportFormat::Archive => import_archive(session, &file.bytes, codec),
    }
}

/// Imports one document file into a new tab.
///
/// # Errors
/// - `InvalidJson` / `InvalidDocument` when the file is malformed; no tab is
///   created.
pub fn import_document_json<B, D, S>(
    session: &mut EditorSession<B, D, S>,
    file_name: &str,
    bytes: &[u8],
) -> TransferResult<ImportReport>
where
    B: BlobStore,
    D: DocumentRepository,
    S: SessionRepository,
{
    let document = parse_document(bytes).map_err(|err| {
        warn!("event=import_document module=transfer status=error file={file_name} error={err}");
        err
    })?;

    let mut report = ImportReport::default();
    report.tabs.push(session.add_unsaved(document));
    finish_import(session, &mut report);
    Ok(report)
}

/// Decodes an archive and imports its entries.
pub fn import_archive<B, D, S, C>(
    session: &mut EditorSession<B, D, S>,
    bytes: &[u8],
    codec: &C,
) -> TransferResult<ImportReport>
where
    B: BlobStore,
    D: DocumentRepository,
    S: SessionRepository,
    C: ArchiveCodec,
{
    let entries = codec.decode(bytes)?;
    Ok(import_entries(session, entries))
}

#[derive(Default)]
struct FolderEntries {
    documents: Vec<ArchiveEntry>,
    blobs: Vec<(BlobKind, String, ArchiveEntry)>,
}

/// Imports decoded archive entries. Every document folder becomes one new
/// tab marked as changed; per-entry problems land in the report.
pub fn import_entries<B, D, S>(
    session: &mut EditorSession<B, D, S>,
    entries: Vec<ArchiveEntry>,
) -> ImportReport
where
    B: BlobStore,
    D: DocumentRepository,
    S: SessionRepository,
{
    let mut report = ImportReport::default();
    let mut folders: BTreeMap<String, FolderEntries> = BTreeMap::new();

    for entry in entries {
        let segments: Vec<String> = entry.segments().into_iter().map(str::to_string).collect();
        match segments.as_slice() {
            [name] if name.ends_with(".json") => {
                let folder = name.trim_end_matches(".json").to_string();
                folders.entry(folder).or_default().documents.push(entry);
            }
            [folder, name] if name.ends_with(".json") => {
                folders
                    .entry(folder.clone())
                    .or_default()
                    .documents
                    .push(entry);
            }
            [folder, dir, key] => match blob_kind_for_dir(dir) {
                Some(kind) => folders.entry(folder.clone()).or_default().blobs.push((
                    kind,
                    key.clone(),
                    entry,
                )),
                None => report.failures.push(failure(&entry.path, "unexpected folder")),
            },
            _ => report
                .failures
                .push(failure(&entry.path, "unexpected archive entry")),
        }
    }

    for (folder, contents) in folders {
        import_folder(session, &folder, contents, &mut report);
    }
    finish_import(session, &mut report);

    info!(
        "event=import_archive module=transfer status=ok tabs={} blobs={} failures={} missing={}",
        report.tabs.len(),
        report.stored_blobs.len(),
        report.failures.len(),
        report.missing.len()
    );
    report
}

fn import_folder<B, D, S>(
    session: &mut EditorSession<B, D, S>,
    folder: &str,
    contents: FolderEntries,
    report: &mut ImportReport,
) where
    B: BlobStore,
    D: DocumentRepository,
    S: SessionRepository,
{
    let primary = format!("{folder}.json");
    let Some(entry) = contents
        .documents
        .iter()
        .find(|entry| entry.path.ends_with(&primary))
        .or_else(|| contents.documents.first())
    else {
        report
            .failures
            .push(failure(folder, "folder has no document file"));
        return;
    };

    let document = match parse_document(&entry.data) {
        Ok(document) => document,
        Err(err) => {
            report.failures.push(failure(&entry.path, err));
            return;
        }
    };

    for (kind, key, blob_entry) in contents.blobs {
        let blob = BlobRef::new(kind, key.as_str());
        if !document.references(&blob) {
            debug!(
                "event=import_blob module=transfer status=skip path={} reason=unreferenced",
                blob_entry.path
            );
            continue;
        }
        let upload = FileUpload::new(key.as_str(), None, blob_entry.data);
        if let Err(err) = validate_upload(&upload, kind, session.config()) {
            report.failures.push(failure(&blob_entry.path, err));
            continue;
        }
        match session.blobs().store(kind, &key, &upload.payload) {
            Ok(()) => report.stored_blobs.push(blob),
            Err(err) => report.failures.push(failure(&blob_entry.path, err)),
        }
    }

    report.tabs.push(session.add_unsaved(document));
}

/// Sweeps imported tabs for missing payloads and brings the first one to
/// the front.
fn finish_import<B, D, S>(session: &mut EditorSession<B, D, S>, report: &mut ImportReport)
where
    B: BlobStore,
    D: DocumentRepository,
    S: SessionRepository,
{
    for tab_id in &report.tabs {
        let refs = match session.sweep_missing(*tab_id) {
            Ok(refs) => refs,
            Err(err) => {
                report
                    .failures
                    .push(failure(&tab_id.to_string(), err));
                continue;
            }
        };
        let title = session
            .tab(*tab_id)
            .map(|tab| tab.title.clone())
            .unwrap_or_default();
        report
            .missing
            .extend(refs.into_iter().map(|blob| ReferenceMissing {
                tab_id: *tab_id,
                document_title: title.clone(),
                blob,
            }));
    }

    if let Some(first) = report.tabs.first().copied() {
        if let Err(err) = session.select_tab(first) {
            warn!("event=import_select module=transfer status=error tab_id={first} error={err}");
            report.failures.push(failure(&first.to_string(), err));
        }
    }
}

fn blob_kind_for_dir(dir: &str) -> Option<BlobKind> {
    [BlobKind::Image, BlobKind::AttachmentFile]
        .into_iter()
        .find(|kind| kind.archive_dir() == dir)
}

fn failure(path: &str, reason: impl Display) -> ImportFailure {
    ImportFailure {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        assert_eq!(detect_format("a.JSON").unwrap(), ImportFormat::DocumentJson);
        assert_eq!(detect_format("bundle.zip").unwrap(), ImportFormat::Archive);
        assert!(matches!(
            detect_format("notes.txt"),
            Err(TransferError::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn parse_document_reports_shape_and_structure_errors() {
        assert!(matches!(
            parse_document(b"{not json"),
            Err(TransferError::InvalidJson(_))
        ));
        let long_title = format!(r#"{{"title":"{}"}}"#, "x".repeat(201));
        assert!(matches!(
            parse_document(long_title.as_bytes()),
            Err(TransferError::InvalidDocument(_))
        ));
        assert!(parse_document(br#"{"title":"Nightly"}"#).is_ok());
    }
}
