//! Attachment key naming and context-driven re-derivation.
//!
//! # Responsibility
//! - Derive descriptive blob keys from document context
//!   (`<category>-<step label>-image[-N]`, `general-image[-N]`,
//!   `<file stem>[-N].<ext>`).
//! - Re-derive image keys after category/step label edits and move
//!   payloads to the new keys.
//!
//! # Invariants
//! - Keys are unique among the local references of one document.
//! - Counters are recomputed from current state on every allocation;
//!   nothing persists a counter.
//! - A rename writes the new key fully before the old key is deleted.
//! - A reference whose payload is missing is never renamed.

use crate::model::blob::{BlobKind, BlobRef};
use crate::model::document::{Document, RefLocation};
use crate::model::tab::Tab;
use crate::repo::blob_repo::{file_extension, BlobStore};
use crate::repo::common::StoreResult;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

static NON_ALNUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// Key base for document-level images.
pub const GENERAL_IMAGE_BASE: &str = "general-image";
/// Context used when category and step label are both empty.
pub const FALLBACK_CONTEXT: &str = "untitled";
/// Stem used when an uploaded file name has no usable characters.
pub const FALLBACK_FILE_STEM: &str = "file";

/// Where a new image is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTarget {
    Step(usize),
    Document,
}

/// Lower-cases `input`, collapses non-alphanumerics into single hyphens and
/// truncates to `max_len` characters. Returns `None` for empty results.
pub fn slugify(input: &str, max_len: usize) -> Option<String> {
    let lowered = input.to_lowercase();
    let collapsed = NON_ALNUM_RE.replace_all(&lowered, "-");
    let trimmed = collapsed.trim_matches('-');
    let truncated: String = trimmed.chars().take(max_len).collect();
    let slug = truncated.trim_end_matches('-');
    if slug.is_empty() {
        None
    } else {
        Some(slug.to_string())
    }
}

/// Base key for an image attached to a step.
pub fn step_image_base(category: &str, step_label: &str, max_len: usize) -> String {
    let context = slugify(&format!("{category} {step_label}"), max_len)
        .unwrap_or_else(|| FALLBACK_CONTEXT.to_string());
    format!("{context}-image")
}

/// Base key an image at `location` should carry given current context.
pub fn image_base_for(document: &Document, location: RefLocation, max_len: usize) -> Option<String> {
    match location {
        RefLocation::StepMedia { step, .. } => {
            let label = document.steps.get(step)?.label.as_str();
            Some(step_image_base(&document.category, label, max_len))
        }
        RefLocation::DocumentImage { .. } => Some(GENERAL_IMAGE_BASE.to_string()),
        RefLocation::Attachment { .. } => None,
    }
}

/// Whether `key` is `base` or `base-N` with `N >= 2`.
pub fn key_matches_base(key: &str, base: &str) -> bool {
    if key == base {
        return true;
    }
    key.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|counter| counter.parse::<u32>().ok())
        .is_some_and(|counter| counter >= 2)
}

/// First candidate from `base`, `base-2`, `base-3`, ... that is not taken.
pub fn next_free_key(base: &str, is_taken: impl FnMut(&str) -> bool) -> String {
    next_free_with(|counter| counter_key(base, counter, None), is_taken)
}

fn next_free_with(
    candidate: impl Fn(u32) -> String,
    mut is_taken: impl FnMut(&str) -> bool,
) -> String {
    let mut counter = 1;
    loop {
        let key = candidate(counter);
        if !is_taken(&key) {
            return key;
        }
        counter += 1;
    }
}

fn counter_key(base: &str, counter: u32, extension: Option<&str>) -> String {
    let mut key = if counter <= 1 {
        base.to_string()
    } else {
        format!("{base}-{counter}")
    };
    if let Some(extension) = extension {
        key.push('.');
        key.push_str(extension);
    }
    key
}

/// One planned key move inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePlan {
    pub from: String,
    pub to: String,
    pub locations: Vec<RefLocation>,
}

/// Computes key moves for images whose key no longer matches their context.
///
/// Keys still referenced by the document are never handed out, so a move can
/// not overwrite a payload another reference still points at.
pub fn plan_renames(
    document: &Document,
    max_len: usize,
    mut is_taken_elsewhere: impl FnMut(&str) -> bool,
) -> Vec<RenamePlan> {
    let mut taken = document.keys_of(BlobKind::Image);
    let mut plans: Vec<RenamePlan> = Vec::new();
    let mut planned: BTreeMap<String, usize> = BTreeMap::new();

    for item in document.local_refs() {
        if item.blob.kind != BlobKind::Image {
            continue;
        }
        let Some(base) = image_base_for(document, item.location, max_len) else {
            continue;
        };
        if let Some(&plan_index) = planned.get(&item.blob.key) {
            plans[plan_index].locations.push(item.location);
            continue;
        }
        if key_matches_base(&item.blob.key, &base) {
            continue;
        }

        let to = next_free_key(&base, |candidate| {
            taken.contains(candidate) || is_taken_elsewhere(candidate)
        });
        taken.insert(to.clone());
        planned.insert(item.blob.key.clone(), plans.len());
        plans.push(RenamePlan {
            from: item.blob.key,
            to,
            locations: vec![item.location],
        });
    }

    plans
}

/// Step of a rename that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameStage {
    Read,
    Write,
    Cleanup,
}

/// A key move that could not be completed; the old payload is retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameFailure {
    pub from: String,
    pub to: String,
    pub stage: RenameStage,
    pub message: String,
}

impl Display for RenameFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rename `{}` -> `{}` failed at {:?}: {}",
            self.from, self.to, self.stage, self.message
        )
    }
}

/// Outcome of one resolver pass over a tab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverReport {
    /// `(old key, new key)` pairs whose references now point at the new key.
    pub renamed: Vec<(String, String)>,
    /// References skipped because their payload is missing.
    pub unresolved: Vec<BlobRef>,
    pub failures: Vec<RenameFailure>,
    /// Stale keys from earlier interrupted renames deleted in this pass.
    pub cleaned: Vec<BlobRef>,
}

impl ResolverReport {
    pub fn changed_document(&self) -> bool {
        !self.renamed.is_empty()
    }
}

/// Allocates and re-derives keys against one blob store.
pub struct NamingResolver<'a, B: BlobStore> {
    blobs: &'a B,
    max_len: usize,
}

impl<'a, B: BlobStore> NamingResolver<'a, B> {
    pub fn new(blobs: &'a B, max_len: usize) -> Self {
        Self { blobs, max_len }
    }

    /// Picks a fresh image key for `target`. Returns `None` when the step
    /// does not exist.
    pub fn allocate_image_key(
        &self,
        document: &Document,
        target: ImageTarget,
    ) -> StoreResult<Option<String>> {
        let base = match target {
            ImageTarget::Step(step) => match document.steps.get(step) {
                Some(step) => step_image_base(&document.category, &step.label, self.max_len),
                None => return Ok(None),
            },
            ImageTarget::Document => GENERAL_IMAGE_BASE.to_string(),
        };
        let taken = document.keys_of(BlobKind::Image);
        let key = self.first_free(BlobKind::Image, &taken, |counter| {
            counter_key(&base, counter, None)
        })?;
        Ok(Some(key))
    }

    /// Picks a fresh attachment key derived from the uploaded file name.
    pub fn allocate_file_key(&self, document: &Document, file_name: &str) -> StoreResult<String> {
        let extension = file_extension(file_name);
        let stem = match (&extension, file_name.trim().rsplit_once('.')) {
            (Some(_), Some((stem, _))) => stem,
            _ => file_name.trim(),
        };
        let stem = slugify(stem, self.max_len).unwrap_or_else(|| FALLBACK_FILE_STEM.to_string());
        let taken = document.keys_of(BlobKind::AttachmentFile);
        self.first_free(BlobKind::AttachmentFile, &taken, |counter| {
            counter_key(&stem, counter, extension.as_deref())
        })
    }

    fn first_free(
        &self,
        kind: BlobKind,
        taken: &BTreeSet<String>,
        candidate: impl Fn(u32) -> String,
    ) -> StoreResult<String> {
        let mut counter = 1;
        loop {
            let key = candidate(counter);
            if !taken.contains(&key) && !self.blobs.exists(kind, &key)? {
                return Ok(key);
            }
            counter += 1;
        }
    }

    /// Runs one re-derivation pass over `tab`.
    ///
    /// `shared` lists blobs other tabs or saved documents still reference;
    /// their old keys are kept after a move.
    pub fn resolve(&self, tab: &mut Tab, shared: &BTreeSet<BlobRef>) -> ResolverReport {
        let mut report = ResolverReport::default();
        self.retry_stale_cleanup(tab, shared, &mut report);

        let mut store_errors = Vec::new();
        let plans = plan_renames(&tab.document, self.max_len, |candidate| {
            match self.blobs.exists(BlobKind::Image, candidate) {
                Ok(exists) => exists,
                Err(err) => {
                    store_errors.push(err.to_string());
                    true
                }
            }
        });
        for message in store_errors {
            warn!(
                "event=naming_resolve module=naming status=error tab_id={} stage=probe error={}",
                tab.id, message
            );
        }

        for plan in plans {
            self.apply_plan(tab, plan, shared, &mut report);
        }

        if report.changed_document() || !report.failures.is_empty() {
            info!(
                "event=naming_resolve module=naming status=ok tab_id={} renamed={} unresolved={} failures={}",
                tab.id,
                report.renamed.len(),
                report.unresolved.len(),
                report.failures.len()
            );
        }
        report
    }

    fn apply_plan(
        &self,
        tab: &mut Tab,
        plan: RenamePlan,
        shared: &BTreeSet<BlobRef>,
        report: &mut ResolverReport,
    ) {
        let old = BlobRef::image(plan.from.as_str());
        let payload = match self.blobs.get(BlobKind::Image, &plan.from) {
            Ok(Some(blob)) => blob.payload,
            Ok(None) => {
                warn!(
                    "event=naming_rename module=naming status=skip tab_id={} from={} reason=payload_missing",
                    tab.id, plan.from
                );
                tab.unresolved.insert(old.clone());
                report.unresolved.push(old);
                return;
            }
            Err(err) => {
                report
                    .failures
                    .push(failure(&plan, RenameStage::Read, err.to_string()));
                return;
            }
        };

        if let Err(err) = self.blobs.store(BlobKind::Image, &plan.to, &payload) {
            warn!(
                "event=naming_rename module=naming status=error tab_id={} from={} to={} stage=write error={}",
                tab.id, plan.from, plan.to, err
            );
            report
                .failures
                .push(failure(&plan, RenameStage::Write, err.to_string()));
            return;
        }

        for location in &plan.locations {
            tab.document.relink(*location, &plan.to);
        }
        tab.document.invalidate_previews(&plan.from);
        tab.unresolved.remove(&old);
        report.renamed.push((plan.from.clone(), plan.to.clone()));

        if shared.contains(&old) {
            return;
        }
        if let Err(err) = self.blobs.delete(BlobKind::Image, &plan.from) {
            warn!(
                "event=naming_rename module=naming status=error tab_id={} from={} to={} stage=cleanup error={}",
                tab.id, plan.from, plan.to, err
            );
            tab.stale_keys.insert(old);
            report
                .failures
                .push(failure(&plan, RenameStage::Cleanup, err.to_string()));
        }
    }

    fn retry_stale_cleanup(
        &self,
        tab: &mut Tab,
        shared: &BTreeSet<BlobRef>,
        report: &mut ResolverReport,
    ) {
        let stale: Vec<BlobRef> = tab.stale_keys.iter().cloned().collect();
        for blob in stale {
            if tab.document.references(&blob) || shared.contains(&blob) {
                tab.stale_keys.remove(&blob);
                continue;
            }
            match self.blobs.delete(blob.kind, &blob.key) {
                Ok(_) => {
                    tab.stale_keys.remove(&blob);
                    report.cleaned.push(blob);
                }
                Err(err) => warn!(
                    "event=naming_cleanup module=naming status=error tab_id={} key={} error={}",
                    tab.id, blob.key, err
                ),
            }
        }
    }
}

fn failure(plan: &RenamePlan, stage: RenameStage, message: String) -> RenameFailure {
    RenameFailure {
        from: plan.from.clone(),
        to: plan.to.clone(),
        stage,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::document::{MediaRef, Step};

    #[test]
    fn slugify_collapses_and_truncates() {
        assert_eq!(
            slugify("  Batch / Retrieve!! ", 48).as_deref(),
            Some("batch-retrieve")
        );
        assert_eq!(slugify("abc def", 4).as_deref(), Some("abc"));
        assert_eq!(slugify("!!!", 10), None);
    }

    #[test]
    fn step_image_base_falls_back_for_empty_context() {
        assert_eq!(step_image_base("Batch", "Retrieve", 48), "batch-retrieve-image");
        assert_eq!(step_image_base("", "  ", 48), "untitled-image");
    }

    #[test]
    fn key_matches_base_accepts_counter_suffixes_only() {
        assert!(key_matches_base("batch-retrieve-image", "batch-retrieve-image"));
        assert!(key_matches_base("batch-retrieve-image-3", "batch-retrieve-image"));
        assert!(!key_matches_base("batch-retrieve-image-1", "batch-retrieve-image"));
        assert!(!key_matches_base("batch-retrieve-image-x", "batch-retrieve-image"));
        assert!(!key_matches_base("batch-fetch-image", "batch-retrieve-image"));
    }

    #[test]
    fn next_free_key_reuses_released_counters() {
        let taken = ["general-image", "general-image-3"];
        let key = next_free_key("general-image", |candidate| taken.contains(&candidate));
        assert_eq!(key, "general-image-2");
    }

    #[test]
    fn plan_renames_follows_step_label_changes() {
        let mut step = Step::new("Fetch");
        step.media.push(MediaRef::local("batch-retrieve-image"));
        step.media.push(MediaRef::local("batch-retrieve-image-2"));
        let document = Document {
            title: "Nightly".to_string(),
            category: "Batch".to_string(),
            steps: vec![step],
            images: vec![MediaRef::local("general-image")],
            ..Document::default()
        };

        let plans = plan_renames(&document, 48, |_| false);
        let moves: Vec<_> = plans
            .iter()
            .map(|plan| (plan.from.as_str(), plan.to.as_str()))
            .collect();
        assert_eq!(
            moves,
            vec![
                ("batch-retrieve-image", "batch-fetch-image"),
                ("batch-retrieve-image-2", "batch-fetch-image-2"),
            ]
        );
    }

    #[test]
    fn plan_renames_never_targets_a_key_still_in_use() {
        let mut first = Step::new("Load");
        first.media.push(MediaRef::local("etl-extract-image"));
        let mut second = Step::new("Extract");
        second.media.push(MediaRef::local("etl-load-image"));
        let document = Document {
            title: "Swap".to_string(),
            category: "ETL".to_string(),
            steps: vec![first, second],
            ..Document::default()
        };

        let plans = plan_renames(&document, 48, |_| false);
        assert_eq!(plans[0].to, "etl-load-image-2");
        assert_eq!(plans[1].to, "etl-extract-image-2");
    }
}
