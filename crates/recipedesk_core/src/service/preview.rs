//! Read-only preview of the active document and preview handle cache.
//!
//! # Responsibility
//! - Render a document into preview markdown plus a plain summary.
//! - Hand out preview handles for stored images and discard loads that
//!   finish after the user switched to another document.
//!
//! # Invariants
//! - A load is applied only while its originating editor id is active.
//! - Handles are invalidated whenever the key they point at moves.

use crate::model::blob::BlobRef;
use crate::model::document::{Document, MediaRef, PreviewHandle};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write;
use uuid::Uuid;

const SUMMARY_MAX_CHARS: usize = 160;

static MARKDOWN_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*]\(([^)]+)\)").expect("valid image regex"));
static MARKDOWN_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid link regex"));
static MARKDOWN_SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\*_`#>~\-\[\]\(\)!]+"#).expect("valid markdown symbol regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Preview representation of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPreview {
    pub editor_id: Option<Uuid>,
    pub markdown: String,
    /// Sanitized plain text, capped in length.
    pub summary_text: Option<String>,
    /// Source of the first image in the preview.
    pub cover_image: Option<String>,
}

/// Renders `document` into preview markdown.
pub fn render_preview(document: &Document) -> DocumentPreview {
    let mut markdown = String::new();
    let title = document.title.trim();
    let _ = writeln!(
        markdown,
        "# {}",
        if title.is_empty() { "Untitled" } else { title }
    );
    if !document.category.trim().is_empty() {
        let _ = writeln!(markdown, "\n_{}_", document.category.trim());
    }
    push_section(&mut markdown, None, &document.summary);
    for media in &document.images {
        push_image(&mut markdown, media);
    }
    push_section(&mut markdown, Some("Prerequisites"), &document.prerequisites);

    if !document.steps.is_empty() {
        markdown.push_str("\n## Steps\n");
    }
    for (index, step) in document.steps.iter().enumerate() {
        let _ = writeln!(markdown, "\n### {}. {}", index + 1, step.label.trim());
        if !step.description.trim().is_empty() {
            let _ = writeln!(markdown, "\n{}", step.description.trim());
        }
        if !step.config.is_empty() {
            markdown.push('\n');
        }
        for entry in &step.config {
            let _ = writeln!(markdown, "- `{}`: {}", entry.name, entry.value);
        }
        for media in &step.media {
            push_image(&mut markdown, media);
        }
    }

    push_section(&mut markdown, Some("Notes"), &document.notes);

    if !document.attachments.is_empty() {
        markdown.push_str("\n## Downloads\n\n");
    }
    for file in &document.attachments {
        let label = if file.file_name.is_empty() {
            file.source.as_str()
        } else {
            file.file_name.as_str()
        };
        let _ = writeln!(markdown, "- [{}]({})", label, file.source);
    }

    if !document.related_links.is_empty() {
        markdown.push_str("\n## Related\n\n");
    }
    for link in &document.related_links {
        let _ = writeln!(markdown, "- [{}]({})", link.title, link.url);
    }
    if !document.keywords.is_empty() {
        let _ = writeln!(markdown, "\nKeywords: {}", document.keywords.join(", "));
    }

    let (summary_text, cover_image) = summarize(&markdown);
    DocumentPreview {
        editor_id: document.editor_id,
        markdown,
        summary_text,
        cover_image,
    }
}

fn push_section(markdown: &mut String, heading: Option<&str>, body: &str) {
    let body = body.trim();
    if body.is_empty() {
        return;
    }
    if let Some(heading) = heading {
        let _ = writeln!(markdown, "\n## {heading}");
    }
    let _ = writeln!(markdown, "\n{body}");
}

fn push_image(markdown: &mut String, media: &MediaRef) {
    let target = media
        .preview
        .as_ref()
        .map_or(media.source.as_str(), |handle| handle.0.as_str());
    let _ = writeln!(markdown, "\n![{}]({})", media.caption, target);
}

fn summarize(markdown: &str) -> (Option<String>, Option<String>) {
    let cover_image = MARKDOWN_IMAGE_RE
        .captures(markdown)
        .and_then(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|value| !value.is_empty());

    let without_images = MARKDOWN_IMAGE_RE.replace_all(markdown, " ");
    let without_links = MARKDOWN_LINK_RE.replace_all(&without_images, "$1");
    let without_symbols = MARKDOWN_SYMBOL_RE.replace_all(&without_links, " ");
    let normalized = WHITESPACE_RE.replace_all(&without_symbols, " ");
    let trimmed = normalized.trim();
    let summary_text = if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(SUMMARY_MAX_CHARS).collect())
    };
    (summary_text, cover_image)
}

/// Image load started for a document; completes later via
/// [`PreviewCache::complete_load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLoad {
    pub origin: Uuid,
    pub blob: BlobRef,
}

/// Preview handles keyed by blob.
#[derive(Debug, Default)]
pub struct PreviewCache {
    handles: HashMap<BlobRef, PreviewHandle>,
    generation: u64,
}

impl PreviewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_load(&self, origin: Uuid, blob: BlobRef) -> PendingLoad {
        PendingLoad { origin, blob }
    }

    /// Applies a finished load. Returns `None` when the load is stale
    /// (`active` is another document) or the payload was not found.
    pub fn complete_load(
        &mut self,
        load: &PendingLoad,
        active: Option<Uuid>,
        payload_found: bool,
    ) -> Option<PreviewHandle> {
        if active != Some(load.origin) {
            debug!(
                "event=preview_load module=preview status=skip key={} reason=stale_origin",
                load.blob.key
            );
            return None;
        }
        if !payload_found {
            return None;
        }
        if let Some(handle) = self.handles.get(&load.blob) {
            return Some(handle.clone());
        }

        self.generation += 1;
        let handle = PreviewHandle(format!(
            "preview://{}/{}?v={}",
            load.blob.kind, load.blob.key, self.generation
        ));
        self.handles.insert(load.blob.clone(), handle.clone());
        Some(handle)
    }

    pub fn handle_for(&self, blob: &BlobRef) -> Option<&PreviewHandle> {
        self.handles.get(blob)
    }

    pub fn invalidate(&mut self, blob: &BlobRef) {
        self.handles.remove(blob);
    }
}
