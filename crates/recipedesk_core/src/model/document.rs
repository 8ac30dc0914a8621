//! Recipe document model.
//!
//! # Responsibility
//! - Define the structured record edited in a tab and exchanged on
//!   import/export.
//! - Enumerate the locally stored blob references a document carries.
//!
//! # Invariants
//! - A reference whose `source` starts with [`LOCAL_REF_PREFIX`] names a
//!   blob store key; everything after the prefix is the key.
//! - `editor_id` and preview handles are editor runtime state; they are
//!   stripped by [`Document::sanitized_for_export`].

use crate::model::blob::{BlobKind, BlobRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Reserved scheme for references resolved through the blob store.
pub const LOCAL_REF_PREFIX: &str = "local://";

const TITLE_MAX_CHARS: usize = 200;
const KEY_MAX_CHARS: usize = 255;

/// Cached preview handle for one media reference. Never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewHandle(pub String);

/// Structured recipe document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Stable saved identity; assigned on first save from the title slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub prerequisites: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Document-level images (`general-image` keys).
    #[serde(default)]
    pub images: Vec<MediaRef>,
    /// Downloadable files.
    #[serde(default, rename = "downloadExecutables")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub related_links: Vec<RelatedLink>,
    /// Editor-internal identity used to discard stale preview loads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: Vec<ConfigEntry>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

impl Step {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub source: String,
    #[serde(default)]
    pub caption: String,
    #[serde(skip)]
    pub preview: Option<PreviewHandle>,
}

impl MediaRef {
    pub fn local(key: &str) -> Self {
        Self {
            source: local_source(key),
            ..Self::default()
        }
    }

    pub fn local_key(&self) -> Option<&str> {
        local_key(&self.source)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub source: String,
    /// Name shown to the reader; the original upload name.
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub description: String,
}

impl AttachmentRef {
    pub fn local(key: &str, file_name: impl Into<String>) -> Self {
        Self {
            source: local_source(key),
            file_name: file_name.into(),
            description: String::new(),
        }
    }

    pub fn local_key(&self) -> Option<&str> {
        local_key(&self.source)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedLink {
    pub title: String,
    pub url: String,
}

/// Where a reference sits inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefLocation {
    StepMedia { step: usize, index: usize },
    DocumentImage { index: usize },
    Attachment { index: usize },
}

/// A locally stored reference together with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRef {
    pub location: RefLocation,
    pub blob: BlobRef,
}

/// Structural validation failures for documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentValidationError {
    TitleTooLong { max_chars: usize },
    InvalidLocalKey(String),
    BlankLinkUrl { index: usize },
}

impl Display for DocumentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TitleTooLong { max_chars } => {
                write!(f, "title exceeds {max_chars} characters")
            }
            Self::InvalidLocalKey(key) => write!(f, "invalid local reference key `{key}`"),
            Self::BlankLinkUrl { index } => write!(f, "related link #{index} has no url"),
        }
    }
}

impl Error for DocumentValidationError {}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates structural invariants required before a document enters a tab
    /// from an external source.
    pub fn validate(&self) -> Result<(), DocumentValidationError> {
        if self.title.chars().count() > TITLE_MAX_CHARS {
            return Err(DocumentValidationError::TitleTooLong {
                max_chars: TITLE_MAX_CHARS,
            });
        }

        let sources = self
            .steps
            .iter()
            .flat_map(|step| step.media.iter().map(|media| media.source.as_str()))
            .chain(self.images.iter().map(|media| media.source.as_str()))
            .chain(self.attachments.iter().map(|file| file.source.as_str()));
        for source in sources {
            if let Some(key) = source.strip_prefix(LOCAL_REF_PREFIX) {
                if !is_path_safe_key(key) {
                    return Err(DocumentValidationError::InvalidLocalKey(key.to_string()));
                }
            }
        }

        for (index, link) in self.related_links.iter().enumerate() {
            if link.url.trim().is_empty() {
                return Err(DocumentValidationError::BlankLinkUrl { index });
            }
        }

        Ok(())
    }

    /// Lists every locally stored reference in document order:
    /// step media, document images, then attachments.
    pub fn local_refs(&self) -> Vec<LocalRef> {
        let mut refs = Vec::new();
        for (step_index, step) in self.steps.iter().enumerate() {
            for (index, media) in step.media.iter().enumerate() {
                if let Some(key) = media.local_key() {
                    refs.push(LocalRef {
                        location: RefLocation::StepMedia {
                            step: step_index,
                            index,
                        },
                        blob: BlobRef::image(key),
                    });
                }
            }
        }
        for (index, media) in self.images.iter().enumerate() {
            if let Some(key) = media.local_key() {
                refs.push(LocalRef {
                    location: RefLocation::DocumentImage { index },
                    blob: BlobRef::image(key),
                });
            }
        }
        for (index, file) in self.attachments.iter().enumerate() {
            if let Some(key) = file.local_key() {
                refs.push(LocalRef {
                    location: RefLocation::Attachment { index },
                    blob: BlobRef::file(key),
                });
            }
        }
        refs
    }

    /// Distinct blobs referenced by this document.
    pub fn blob_refs(&self) -> BTreeSet<BlobRef> {
        self.local_refs().into_iter().map(|item| item.blob).collect()
    }

    pub fn references(&self, blob: &BlobRef) -> bool {
        self.local_refs().iter().any(|item| &item.blob == blob)
    }

    /// Keys already used by local references of `kind`.
    pub fn keys_of(&self, kind: BlobKind) -> BTreeSet<String> {
        self.local_refs()
            .into_iter()
            .filter(|item| item.blob.kind == kind)
            .map(|item| item.blob.key)
            .collect()
    }

    pub fn media_at(&self, location: RefLocation) -> Option<&MediaRef> {
        match location {
            RefLocation::StepMedia { step, index } => self.steps.get(step)?.media.get(index),
            RefLocation::DocumentImage { index } => self.images.get(index),
            RefLocation::Attachment { .. } => None,
        }
    }

    /// Points the reference at `location` to a new local key and drops any
    /// cached preview for it. Returns `false` when the location is gone.
    pub fn relink(&mut self, location: RefLocation, key: &str) -> bool {
        match location {
            RefLocation::StepMedia { step, index } => {
                let Some(media) = self
                    .steps
                    .get_mut(step)
                    .and_then(|step| step.media.get_mut(index))
                else {
                    return false;
                };
                media.source = local_source(key);
                media.preview = None;
            }
            RefLocation::DocumentImage { index } => {
                let Some(media) = self.images.get_mut(index) else {
                    return false;
                };
                media.source = local_source(key);
                media.preview = None;
            }
            RefLocation::Attachment { index } => {
                let Some(file) = self.attachments.get_mut(index) else {
                    return false;
                };
                file.source = local_source(key);
            }
        }
        true
    }

    /// Drops preview handles held for `key`.
    pub fn invalidate_previews(&mut self, key: &str) {
        let media = self
            .steps
            .iter_mut()
            .flat_map(|step| step.media.iter_mut())
            .chain(self.images.iter_mut());
        for item in media {
            if item.local_key() == Some(key) {
                item.preview = None;
            }
        }
    }

    /// Copy without editor runtime fields, as written to exports.
    pub fn sanitized_for_export(&self) -> Document {
        let mut clean = self.clone();
        clean.editor_id = None;
        for media in clean
            .steps
            .iter_mut()
            .flat_map(|step| step.media.iter_mut())
            .chain(clean.images.iter_mut())
        {
            media.preview = None;
        }
        clean
    }
}

/// Builds the `local://` source string for `key`.
pub fn local_source(key: &str) -> String {
    format!("{LOCAL_REF_PREFIX}{key}")
}

/// Extracts the blob key from a `local://` source.
pub fn local_key(source: &str) -> Option<&str> {
    source.strip_prefix(LOCAL_REF_PREFIX)
}

/// Keys become archive file names, so they must be single path segments.
pub fn is_path_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key.chars().count() <= KEY_MAX_CHARS
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
        && !key.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut step = Step::new("Retrieve");
        step.media.push(MediaRef::local("batch-retrieve-image"));
        step.media.push(MediaRef {
            source: "https://example.com/remote.png".to_string(),
            ..MediaRef::default()
        });
        Document {
            title: "Nightly batch".to_string(),
            category: "Batch".to_string(),
            steps: vec![step],
            images: vec![MediaRef::local("general-image")],
            attachments: vec![AttachmentRef::local("run.sh", "run.sh")],
            ..Document::default()
        }
    }

    #[test]
    fn local_refs_skip_remote_sources_and_keep_order() {
        let refs = sample().local_refs();
        let keys: Vec<_> = refs.iter().map(|item| item.blob.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "image:batch-retrieve-image",
                "image:general-image",
                "attachment_file:run.sh"
            ]
        );
    }

    #[test]
    fn validate_rejects_unsafe_local_keys() {
        let mut doc = sample();
        doc.images.push(MediaRef::local("../escape"));
        assert!(matches!(
            doc.validate(),
            Err(DocumentValidationError::InvalidLocalKey(_))
        ));
    }

    #[test]
    fn export_copy_drops_runtime_fields() {
        let mut doc = sample();
        doc.editor_id = Some(Uuid::new_v4());
        doc.steps[0].media[0].preview = Some(PreviewHandle("preview:1".to_string()));

        let clean = doc.sanitized_for_export();
        assert!(clean.editor_id.is_none());
        assert!(clean.steps[0].media[0].preview.is_none());
        assert_eq!(clean.steps[0].media[0].source, doc.steps[0].media[0].source);
    }

    #[test]
    fn json_without_title_is_rejected() {
        let err = serde_json::from_str::<Document>(r#"{"category":"Batch"}"#);
        assert!(err.is_err());
    }
}
