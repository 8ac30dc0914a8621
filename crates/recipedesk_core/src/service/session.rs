//! Tab session manager.
//!
//! # Responsibility
//! - Own the open tab list, the active-tab pointer and dirty tracking.
//! - Route every document edit through `update_document`, scheduling the
//!   preview, naming and autosave channels.
//! - Attach and detach blobs, releasing payloads no document references.
//! - Persist and restore the session snapshot.
//!
//! # Invariants
//! - While the session is open it has at least one tab and exactly one
//!   active tab.
//! - Switching tabs saves a dirty outgoing tab before the incoming tab is
//!   activated.
//! - Storage failures keep in-memory documents intact so the user can retry.

use crate::config::{ConfigError, EditorConfig};
use crate::model::blob::{BlobKind, BlobRef, FileUpload};
use crate::model::document::{AttachmentRef, Document, MediaRef, PreviewHandle, RefLocation};
use crate::model::tab::{display_title, PersistedSessionSnapshot, Tab, TabId};
use crate::repo::blob_repo::{validate_upload, BlobStore, BlobValidationError, SqliteBlobStore};
use crate::repo::common::StoreError;
use crate::repo::document_repo::{DocumentRepository, SqliteDocumentRepository};
use crate::repo::session_repo::{SessionRepository, SqliteSessionRepository};
use crate::service::autosave::{Channel, Clock, MutationBus};
use crate::service::naming::{slugify, ImageTarget, NamingResolver, RenameFailure, ResolverReport};
use crate::service::preview::{render_preview, DocumentPreview, PendingLoad, PreviewCache};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use uuid::Uuid;

/// Identity used when a title slugifies to nothing.
pub const FALLBACK_DOCUMENT_ID: &str = "untitled";
const DOCUMENT_ID_MAX_LEN: usize = 80;

pub type SessionResult<T> = Result<T, SessionError>;

/// Session operation error.
#[derive(Debug)]
pub enum SessionError {
    TabNotFound(TabId),
    /// Step index, media index or attachment index does not exist.
    InvalidTarget(String),
    DocumentNotFound(String),
    Validation(BlobValidationError),
    Storage(StoreError),
    Config(ConfigError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TabNotFound(id) => write!(f, "tab not found: {id}"),
            Self::InvalidTarget(message) => write!(f, "invalid target: {message}"),
            Self::DocumentNotFound(id) => write!(f, "saved document not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

impl From<BlobValidationError> for SessionError {
    fn from(value: BlobValidationError) -> Self {
        Self::Validation(value)
    }
}

/// User-visible notifications collected by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TabSaved { tab_id: TabId, document_id: String },
    SaveFailed { tab_id: TabId, message: String },
    KeysRenamed { tab_id: TabId, renamed: Vec<(String, String)> },
    RenameFailed { tab_id: TabId, failure: RenameFailure },
    ReferencesUnresolved { tab_id: TabId, refs: Vec<BlobRef> },
    SnapshotFailed { message: String },
}

/// Answer to the close confirmation for a tab with unsaved changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseConfirmation {
    Discard,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    Cancelled,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { document_id: String },
    /// Tab had no changes; nothing was written.
    Unchanged,
}

/// Result of saving several tabs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveAllReport {
    pub saved: Vec<TabId>,
    pub failed: Vec<(TabId, String)>,
}

impl SaveAllReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Session wired to the SQLite repositories of one connection.
pub type SqliteEditorSession<'conn> = EditorSession<
    SqliteBlobStore<'conn>,
    SqliteDocumentRepository<'conn>,
    SqliteSessionRepository<'conn>,
>;

/// Multi-document editing session.
pub struct EditorSession<B, D, S>
where
    B: BlobStore,
    D: DocumentRepository,
    S: SessionRepository,
{
    blobs: B,
    documents: D,
    snapshots: S,
    config: EditorConfig,
    clock: Rc<dyn Clock>,
    tabs: Vec<Tab>,
    bus: MutationBus,
    previews: PreviewCache,
    preview: Option<DocumentPreview>,
    events: Vec<SessionEvent>,
}

impl<B, D, S> EditorSession<B, D, S>
where
    B: BlobStore,
    D: DocumentRepository,
    S: SessionRepository,
{
    /// Opens a session, restoring the persisted tab list when one exists.
    ///
    /// An unreadable snapshot is logged and replaced by a fresh tab.
    pub fn open(
        blobs: B,
        documents: D,
        snapshots: S,
        config: EditorConfig,
        clock: Rc<dyn Clock>,
    ) -> SessionResult<Self> {
        config.validate().map_err(SessionError::Config)?;
        let bus = MutationBus::new(
            config.preview_debounce(),
            config.resolver_debounce(),
            config.autosave_debounce(),
        );
        let mut session = Self {
            blobs,
            documents,
            snapshots,
            config,
            clock,
            tabs: Vec::new(),
            bus,
            previews: PreviewCache::new(),
            preview: None,
            events: Vec::new(),
        };

        match session.snapshots.load_snapshot() {
            Ok(Some(snapshot)) => session.restore(snapshot),
            Ok(None) => {}
            Err(err) => error!(
                "event=session_restore module=session status=error error_code=snapshot_unreadable error={}",
                err
            ),
        }
        if session.tabs.is_empty() {
            session.create_tab();
        }
        session.refresh_preview();

        info!(
            "event=session_open module=session status=ok tabs={}",
            session.tabs.len()
        );
        Ok(session)
    }

    fn restore(&mut self, snapshot: PersistedSessionSnapshot) {
        self.tabs = snapshot.tabs;
        for tab in &mut self.tabs {
            if tab.document.editor_id.is_none() {
                tab.document.editor_id = Some(Uuid::new_v4());
            }
        }
        let active_index = snapshot
            .active_tab_id
            .and_then(|id| self.index_of(id))
            .or_else(|| self.tabs.iter().position(|tab| tab.is_active))
            .unwrap_or(0);
        if !self.tabs.is_empty() {
            self.activate_only(active_index);
        }
    }

    // Tab list

    /// Opens a new tab around an empty document and makes it active.
    pub fn create_tab(&mut self) -> TabId {
        let id = self.push_tab(Tab::new(Document::new()));
        debug!("event=tab_create module=session status=ok tab_id={id}");
        id
    }

    /// Activates `id`, saving a dirty outgoing tab first. Unknown ids are
    /// ignored.
    ///
    /// # Errors
    /// - Returns `Storage` when the outgoing tab cannot be saved; the active
    ///   tab does not change.
    pub fn select_tab(&mut self, id: TabId) -> SessionResult<()> {
        let Some(index) = self.index_of(id) else {
            return Ok(());
        };
        if let Some(active) = self.active_index() {
            if active == index {
                return Ok(());
            }
            if self.tabs[active].has_changes {
                let outgoing = self.tabs[active].id;
                self.save_tab(outgoing)?;
            }
        }

        self.activate_only(index);
        let now = self.clock.now();
        self.bus.trigger(Channel::Preview, id, now);
        debug!("event=tab_select module=session status=ok tab_id={id}");
        Ok(())
    }

    /// Closes `id`. A tab with unsaved changes is only closed when `confirm`
    /// answers [`CloseConfirmation::Discard`].
    pub fn close_tab(
        &mut self,
        id: TabId,
        confirm: impl FnOnce(&Tab) -> CloseConfirmation,
    ) -> CloseOutcome {
        let Some(index) = self.index_of(id) else {
            return CloseOutcome::NotFound;
        };
        if self.tabs[index].has_changes && confirm(&self.tabs[index]) == CloseConfirmation::Cancel
        {
            return CloseOutcome::Cancelled;
        }

        let closed = self.tabs.remove(index);
        self.bus.forget(closed.id);
        self.release_unreferenced(closed.document.blob_refs());

        if self.tabs.is_empty() {
            self.create_tab();
        } else if closed.is_active {
            let next = index.min(self.tabs.len() - 1);
            let next_id = self.tabs[next].id;
            // No tab is active now, so selection cannot trigger a save.
            if let Err(err) = self.select_tab(next_id) {
                warn!("event=tab_close module=session status=error tab_id={id} error={err}");
                self.activate_only(next);
            }
        }

        info!(
            "event=tab_close module=session status=ok tab_id={} discarded_changes={}",
            id, closed.has_changes
        );
        CloseOutcome::Closed
    }

    /// Opens a saved document, or selects the tab already showing it.
    pub fn open_saved(&mut self, document_id: &str) -> SessionResult<TabId> {
        if let Some(tab_id) = self
            .tabs
            .iter()
            .find(|tab| tab.document.id.as_deref() == Some(document_id))
            .map(|tab| tab.id)
        {
            self.select_tab(tab_id)?;
            return Ok(tab_id);
        }

        let saved = self
            .documents
            .get_document(document_id)?
            .ok_or_else(|| SessionError::DocumentNotFound(document_id.to_string()))?;
        let mut tab = Tab::new(saved.document);
        tab.last_saved_at = Some(saved.updated_at);
        let tab_id = self.open_tab(tab)?;
        self.sweep_missing(tab_id)?;
        Ok(tab_id)
    }

    /// Appends `document` as an inactive tab marked as changed, with a fresh
    /// editor identity. Nothing is saved until the user edits or saves it.
    pub fn add_unsaved(&mut self, mut document: Document) -> TabId {
        document.editor_id = None;
        let mut tab = Tab::new(document);
        tab.has_changes = true;
        let tab_id = tab.id;
        self.tabs.push(tab);
        if self.active_index().is_none() {
            self.activate_only(self.tabs.len() - 1);
        }
        debug!("event=tab_create module=session status=ok tab_id={tab_id} unsaved=true");
        tab_id
    }

    fn open_tab(&mut self, tab: Tab) -> SessionResult<TabId> {
        if let Some(active) = self.active_index() {
            if self.tabs[active].has_changes {
                let outgoing = self.tabs[active].id;
                self.save_tab(outgoing)?;
            }
        }
        Ok(self.push_tab(tab))
    }

    fn push_tab(&mut self, tab: Tab) -> TabId {
        let id = tab.id;
        self.tabs.push(tab);
        self.activate_only(self.tabs.len() - 1);
        let now = self.clock.now();
        self.bus.trigger(Channel::Preview, id, now);
        id
    }

    // Editing

    /// Applies `mutation` to the tab's document, marks the tab dirty and
    /// schedules preview, naming and autosave work.
    pub fn update_document(
        &mut self,
        tab_id: TabId,
        mutation: impl FnOnce(&mut Document),
    ) -> SessionResult<()> {
        let index = self.require_index(tab_id)?;
        let tab = &mut self.tabs[index];
        mutation(&mut tab.document);
        tab.has_changes = true;
        let title = display_title(&tab.document);
        if tab.title != title {
            tab.title = title;
        }
        let now = self.clock.now();
        self.bus.publish(tab_id, now);
        Ok(())
    }

    /// Validates, names and stores an image, then references it from
    /// `target`. Returns the new key.
    pub fn attach_image(
        &mut self,
        tab_id: TabId,
        target: ImageTarget,
        upload: FileUpload,
    ) -> SessionResult<String> {
        validate_upload(&upload, BlobKind::Image, &self.config)?;
        let index = self.require_index(tab_id)?;

        let resolver = NamingResolver::new(&self.blobs, self.config.max_key_context_len);
        let key = resolver
            .allocate_image_key(&self.tabs[index].document, target)?
            .ok_or_else(|| SessionError::InvalidTarget(format!("{target:?}")))?;
        self.blobs.store(BlobKind::Image, &key, &upload.payload)?;

        self.update_document(tab_id, |document| {
            let media = MediaRef::local(&key);
            match target {
                ImageTarget::Step(step) => {
                    if let Some(step) = document.steps.get_mut(step) {
                        step.media.push(media);
                    }
                }
                ImageTarget::Document => document.images.push(media),
            }
        })?;
        info!("event=blob_attach module=session status=ok tab_id={tab_id} kind=image key={key}");
        Ok(key)
    }

    /// Validates, names and stores a downloadable file. Returns the new key.
    pub fn attach_file(&mut self, tab_id: TabId, upload: FileUpload) -> SessionResult<String> {
        validate_upload(&upload, BlobKind::AttachmentFile, &self.config)?;
        let index = self.require_index(tab_id)?;

        let resolver = NamingResolver::new(&self.blobs, self.config.max_key_context_len);
        let key = resolver.allocate_file_key(&self.tabs[index].document, &upload.file_name)?;
        self.blobs
            .store(BlobKind::AttachmentFile, &key, &upload.payload)?;

        let file_name = upload.file_name;
        self.update_document(tab_id, |document| {
            document
                .attachments
                .push(AttachmentRef::local(&key, file_name));
        })?;
        info!(
            "event=blob_attach module=session status=ok tab_id={tab_id} kind=attachment_file key={key}"
        );
        Ok(key)
    }

    /// Removes one image reference and releases its payload when nothing
    /// else references it.
    pub fn detach_image(
        &mut self,
        tab_id: TabId,
        target: ImageTarget,
        media_index: usize,
    ) -> SessionResult<()> {
        let index = self.require_index(tab_id)?;
        let document = &self.tabs[index].document;
        let exists = match target {
            ImageTarget::Step(step) => document
                .steps
                .get(step)
                .is_some_and(|step| media_index < step.media.len()),
            ImageTarget::Document => media_index < document.images.len(),
        };
        if !exists {
            return Err(SessionError::InvalidTarget(format!(
                "{target:?} media #{media_index}"
            )));
        }

        let mut removed = None;
        self.update_document(tab_id, |document| {
            let media = match target {
                ImageTarget::Step(step) => document.steps[step].media.remove(media_index),
                ImageTarget::Document => document.images.remove(media_index),
            };
            removed = media.local_key().map(BlobRef::image);
        })?;
        if let Some(blob) = removed {
            self.previews.invalidate(&blob);
            self.tabs[index].unresolved.remove(&blob);
            self.release_unreferenced(BTreeSet::from([blob]));
        }
        Ok(())
    }

    /// Removes one attachment reference and releases its payload when
    /// nothing else references it.
    pub fn detach_file(&mut self, tab_id: TabId, attachment_index: usize) -> SessionResult<()> {
        let index = self.require_index(tab_id)?;
        if attachment_index >= self.tabs[index].document.attachments.len() {
            return Err(SessionError::InvalidTarget(format!(
                "attachment #{attachment_index}"
            )));
        }

        let mut removed = None;
        self.update_document(tab_id, |document| {
            let file = document.attachments.remove(attachment_index);
            removed = file.local_key().map(BlobRef::file);
        })?;
        if let Some(blob) = removed {
            self.tabs[index].unresolved.remove(&blob);
            self.release_unreferenced(BTreeSet::from([blob]));
        }
        Ok(())
    }

    // Saving

    /// Saves one tab. A tab without changes is left untouched.
    ///
    /// The document id is derived from the title slug on first save. Ids are
    /// not de-duplicated against other saved documents.
    pub fn save_tab(&mut self, tab_id: TabId) -> SessionResult<SaveOutcome> {
        let index = self.require_index(tab_id)?;
        if !self.tabs[index].has_changes {
            return Ok(SaveOutcome::Unchanged);
        }

        let tab = &mut self.tabs[index];
        let document_id = match tab.document.id.clone() {
            Some(id) => id,
            None => {
                let id = slugify(&tab.document.title, DOCUMENT_ID_MAX_LEN)
                    .unwrap_or_else(|| FALLBACK_DOCUMENT_ID.to_string());
                tab.document.id = Some(id.clone());
                id
            }
        };
        let previous_refs = match self.documents.get_document(&document_id) {
            Ok(saved) => saved
                .map(|saved| saved.document.blob_refs())
                .unwrap_or_default(),
            Err(err) => {
                warn!(
                    "event=tab_save module=session status=skip tab_id={} document_id={} reason=previous_unreadable error={}",
                    tab_id, document_id, err
                );
                BTreeSet::new()
            }
        };

        if let Err(err) = self.documents.save_document(&document_id, &tab.document) {
            error!(
                "event=tab_save module=session status=error tab_id={} document_id={} error={}",
                tab_id, document_id, err
            );
            self.events.push(SessionEvent::SaveFailed {
                tab_id,
                message: err.to_string(),
            });
            return Err(err.into());
        }

        tab.has_changes = false;
        tab.last_saved_at = Some(self.clock.epoch_millis());
        // Refs the saved body held before this write but no longer does.
        let dropped: BTreeSet<BlobRef> = previous_refs
            .difference(&tab.document.blob_refs())
            .cloned()
            .collect();
        self.release_unreferenced(dropped);
        self.bus.settle(Channel::Autosave, tab_id);
        self.events.push(SessionEvent::TabSaved {
            tab_id,
            document_id: document_id.clone(),
        });
        info!(
            "event=tab_save module=session status=ok tab_id={} document_id={}",
            tab_id, document_id
        );
        Ok(SaveOutcome::Saved { document_id })
    }

    /// Saves every dirty tab, continuing past failures.
    pub fn save_all(&mut self) -> SaveAllReport {
        let mut report = SaveAllReport::default();
        let dirty: Vec<TabId> = self
            .tabs
            .iter()
            .filter(|tab| tab.has_changes)
            .map(|tab| tab.id)
            .collect();
        for tab_id in dirty {
            match self.save_tab(tab_id) {
                Ok(_) => report.saved.push(tab_id),
                Err(err) => report.failed.push((tab_id, err.to_string())),
            }
        }
        report
    }

    /// Writes the tab list to the session snapshot.
    pub fn persist_snapshot(&mut self) -> SessionResult<()> {
        let snapshot = self.snapshot();
        if let Err(err) = self.snapshots.save_snapshot(&snapshot) {
            error!("event=session_snapshot module=session status=error error={err}");
            self.events.push(SessionEvent::SnapshotFailed {
                message: err.to_string(),
            });
            return Err(err.into());
        }
        debug!(
            "event=session_snapshot module=session status=ok tabs={}",
            snapshot.tabs.len()
        );
        Ok(())
    }

    pub fn snapshot(&self) -> PersistedSessionSnapshot {
        PersistedSessionSnapshot {
            tabs: self.tabs.clone(),
            active_tab_id: self.active_tab_id(),
        }
    }

    /// Runs pending naming passes, saves every dirty tab and writes the
    /// final snapshot. The snapshot is written even when a save fails so
    /// unsaved edits survive a restart.
    pub fn shutdown(&mut self) -> SaveAllReport {
        for item in self.bus.flush() {
            if item.channel != Channel::Resolver {
                continue;
            }
            for tab_id in item.tabs {
                if self.index_of(tab_id).is_none() {
                    continue;
                }
                if let Err(err) = self.run_resolver(tab_id) {
                    warn!(
                        "event=naming_resolve module=session status=error tab_id={tab_id} error={err}"
                    );
                }
            }
        }
        let report = self.save_all();
        let _ = self.persist_snapshot();
        info!(
            "event=session_shutdown module=session status={} saved={} failed={}",
            if report.is_clean() { "ok" } else { "error" },
            report.saved.len(),
            report.failed.len()
        );
        report
    }

    // Debounced work

    /// Runs every channel whose quiet window has elapsed. Returns the
    /// channels that fired.
    pub fn tick(&mut self) -> Vec<Channel> {
        let now = self.clock.now();
        let due = self.bus.due(now);
        let mut fired = Vec::with_capacity(due.len());
        for item in due {
            match item.channel {
                Channel::Preview => self.refresh_preview(),
                Channel::Resolver => {
                    for tab_id in &item.tabs {
                        if let Err(err) = self.run_resolver(*tab_id) {
                            warn!(
                                "event=naming_resolve module=session status=error tab_id={tab_id} error={err}"
                            );
                        }
                    }
                }
                Channel::Autosave => {
                    for tab_id in &item.tabs {
                        if self.index_of(*tab_id).is_some() {
                            // Failures are already reported as events.
                            let _ = self.save_tab(*tab_id);
                        }
                    }
                    let _ = self.persist_snapshot();
                }
            }
            fired.push(item.channel);
        }
        fired
    }

    /// Re-derives image keys for one tab and moves payloads that changed.
    pub fn run_resolver(&mut self, tab_id: TabId) -> SessionResult<ResolverReport> {
        let index = self.require_index(tab_id)?;
        let shared = self.blobs_referenced_outside(index)?;

        let resolver = NamingResolver::new(&self.blobs, self.config.max_key_context_len);
        let report = resolver.resolve(&mut self.tabs[index], &shared);

        for (from, _) in &report.renamed {
            self.previews.invalidate(&BlobRef::image(from.as_str()));
        }
        for failure in &report.failures {
            self.events.push(SessionEvent::RenameFailed {
                tab_id,
                failure: failure.clone(),
            });
        }
        if !report.unresolved.is_empty() {
            self.events.push(SessionEvent::ReferencesUnresolved {
                tab_id,
                refs: report.unresolved.clone(),
            });
        }
        if report.changed_document() {
            self.tabs[index].has_changes = true;
            self.events.push(SessionEvent::KeysRenamed {
                tab_id,
                renamed: report.renamed.clone(),
            });
            let now = self.clock.now();
            self.bus.trigger(Channel::Preview, tab_id, now);
            self.bus.trigger(Channel::Autosave, tab_id, now);
        }
        Ok(report)
    }

    /// Checks every local reference of one tab against the blob store and
    /// records the missing ones on the tab.
    pub fn sweep_missing(&mut self, tab_id: TabId) -> SessionResult<Vec<BlobRef>> {
        let index = self.require_index(tab_id)?;
        let mut missing = BTreeSet::new();
        for blob in self.tabs[index].document.blob_refs() {
            if !self.blobs.exists(blob.kind, &blob.key)? {
                missing.insert(blob);
            }
        }

        let refs: Vec<BlobRef> = missing.iter().cloned().collect();
        self.tabs[index].unresolved = missing;
        if !refs.is_empty() {
            warn!(
                "event=reference_sweep module=session status=ok tab_id={} missing={}",
                tab_id,
                refs.len()
            );
            self.events.push(SessionEvent::ReferencesUnresolved {
                tab_id,
                refs: refs.clone(),
            });
        }
        Ok(refs)
    }

    /// Recomputes the preview of the active tab.
    pub fn refresh_preview(&mut self) {
        self.preview = self
            .active_index()
            .map(|index| render_preview(&self.tabs[index].document));
    }

    // Preview loads

    /// Starts loading the preview of the image at `location`.
    pub fn begin_preview_load(
        &self,
        tab_id: TabId,
        location: RefLocation,
    ) -> SessionResult<Option<PendingLoad>> {
        let index = self.require_index(tab_id)?;
        let document = &self.tabs[index].document;
        let (Some(origin), Some(key)) = (
            document.editor_id,
            document.media_at(location).and_then(MediaRef::local_key),
        ) else {
            return Ok(None);
        };
        Ok(Some(self.previews.begin_load(origin, BlobRef::image(key))))
    }

    /// Finishes a preview load. Loads whose document is no longer active are
    /// discarded and return `None`.
    pub fn complete_preview_load(
        &mut self,
        load: &PendingLoad,
    ) -> SessionResult<Option<PreviewHandle>> {
        let active = self
            .active_index()
            .and_then(|index| self.tabs[index].document.editor_id);
        if active != Some(load.origin) {
            return Ok(self.previews.complete_load(load, active, false));
        }

        let found = self.blobs.exists(load.blob.kind, &load.blob.key)?;
        let Some(handle) = self.previews.complete_load(load, active, found) else {
            return Ok(None);
        };

        if let Some(index) = self.active_index() {
            let document = &mut self.tabs[index].document;
            for media in document
                .steps
                .iter_mut()
                .flat_map(|step| step.media.iter_mut())
                .chain(document.images.iter_mut())
            {
                if media.local_key() == Some(load.blob.key.as_str()) {
                    media.preview = Some(handle.clone());
                }
            }
        }
        Ok(Some(handle))
    }

    // Accessors

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.is_active)
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.active_tab().map(|tab| tab.id)
    }

    pub fn preview(&self) -> Option<&DocumentPreview> {
        self.preview.as_ref()
    }

    pub fn is_pending(&self, channel: Channel) -> bool {
        self.bus.is_pending(channel)
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    /// Takes the notifications collected since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // Internals

    fn index_of(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == id)
    }

    fn require_index(&self, id: TabId) -> SessionResult<usize> {
        self.index_of(id).ok_or(SessionError::TabNotFound(id))
    }

    fn active_index(&self) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.is_active)
    }

    fn activate_only(&mut self, index: usize) {
        for (position, tab) in self.tabs.iter_mut().enumerate() {
            tab.is_active = position == index;
        }
    }

    /// Blobs referenced by other open tabs or by any saved document,
    /// including the saved record of the tab at `index`. A renamed key stays
    /// on disk until the save that drops it.
    fn blobs_referenced_outside(&self, index: usize) -> SessionResult<BTreeSet<BlobRef>> {
        let mut shared: BTreeSet<BlobRef> = self
            .tabs
            .iter()
            .enumerate()
            .filter(|(position, _)| *position != index)
            .flat_map(|(_, tab)| tab.document.blob_refs())
            .collect();
        for saved in self.documents.list_documents()? {
            shared.extend(saved.document.blob_refs());
        }
        Ok(shared)
    }

    /// Deletes each blob in `candidates` that no open tab and no saved
    /// document references. Failures are logged and leave the blob in place.
    fn release_unreferenced(&mut self, candidates: BTreeSet<BlobRef>) {
        if candidates.is_empty() {
            return;
        }
        let saved = match self.documents.list_documents() {
            Ok(saved) => saved,
            Err(err) => {
                warn!("event=blob_release module=session status=skip reason=documents_unreadable error={err}");
                return;
            }
        };

        for blob in candidates {
            let in_use = self.tabs.iter().any(|tab| tab.document.references(&blob))
                || saved.iter().any(|doc| doc.document.references(&blob));
            if in_use {
                continue;
            }
            self.previews.invalidate(&blob);
            match self.blobs.delete(blob.kind, &blob.key) {
                Ok(_) => debug!(
                    "event=blob_release module=session status=ok kind={} key={}",
                    blob.kind, blob.key
                ),
                Err(err) => warn!(
                    "event=blob_release module=session status=error kind={} key={} error={}",
                    blob.kind, blob.key, err
                ),
            }
        }
    }
}
