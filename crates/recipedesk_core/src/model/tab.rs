//! Editor tab and persisted session snapshot.
//!
//! # Invariants
//! - When a tab list is non-empty exactly one tab has `is_active = true`.
//! - `title` mirrors the document title, or a placeholder when blank.

use crate::model::blob::BlobRef;
use crate::model::document::Document;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub type TabId = Uuid;

/// Display title used for documents without a title.
pub const UNTITLED_TAB_TITLE: &str = "New recipe";

/// One open editing session around a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub title: String,
    pub document: Document,
    pub has_changes: bool,
    pub is_active: bool,
    /// Epoch milliseconds of the last durable save.
    #[serde(default)]
    pub last_saved_at: Option<i64>,
    /// References whose payload is missing from the blob store.
    #[serde(default)]
    pub unresolved: BTreeSet<BlobRef>,
    /// Old keys left behind by a rename whose delete step did not finish.
    #[serde(default)]
    pub stale_keys: BTreeSet<BlobRef>,
}

impl Tab {
    /// Wraps `document` in an inactive, clean tab with a fresh identity.
    pub fn new(mut document: Document) -> Self {
        if document.editor_id.is_none() {
            document.editor_id = Some(Uuid::new_v4());
        }
        Self {
            id: Uuid::new_v4(),
            title: display_title(&document),
            document,
            has_changes: false,
            is_active: false,
            last_saved_at: None,
            unresolved: BTreeSet::new(),
            stale_keys: BTreeSet::new(),
        }
    }
}

/// Tab label derived from the document title.
pub fn display_title(document: &Document) -> String {
    let trimmed = document.title.trim();
    if trimmed.is_empty() {
        UNTITLED_TAB_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Serialized tab list written by autosave and read back on session start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionSnapshot {
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<TabId>,
}
