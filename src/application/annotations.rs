//! Annotation reconciliation.
//!
//! An annotation replaces a fragment's text with its rendered artifact. It is
//! only valid while the live text under its span still equals the text that was
//! compiled, so every attach re-reads the document first. It also remembers the
//! cache key it was rendered under; a changed global context yields a new key
//! and the annotation stops covering its fragment.

use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use crate::domain::{DocumentHost, EditEvent, Fragment, Span};

use super::render::CacheKey;

/// Rendered artifact attached over a document span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Tag used by hosts to locate and remove the visual overlay.
    pub id: Uuid,
    pub span: Span,
    pub key: CacheKey,
    pub artifact_path: PathBuf,
    pub original_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Attached,
    /// The span changed after the job started; the result was dropped.
    Stale,
}

/// Annotations owned by one document, ordered by span start.
#[derive(Debug, Default)]
pub struct AnnotationSet {
    items: Vec<Annotation>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `artifact_path` over `span` if the live text still equals `original_text`.
    pub fn apply(
        &mut self,
        doc: &dyn DocumentHost,
        span: Span,
        key: CacheKey,
        artifact_path: PathBuf,
        original_text: &str,
    ) -> ApplyOutcome {
        let live = doc.text(span);
        if live != Some(original_text) {
            debug!(
                target = "application::annotations",
                op = "annotations::apply",
                result = "stale",
                span = %span,
                "Discarded result for changed span"
            );
            return ApplyOutcome::Stale;
        }

        self.clear(span);
        let position = self.items.partition_point(|item| item.span.start < span.start);
        self.items.insert(
            position,
            Annotation {
                id: Uuid::new_v4(),
                span,
                key,
                artifact_path,
                original_text: original_text.to_string(),
            },
        );
        ApplyOutcome::Attached
    }

    /// Remove every annotation overlapping `span`.
    pub fn clear(&mut self, span: Span) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| !(item.span.overlaps(&span) || item.span == span));
        before - self.items.len()
    }

    pub fn clear_all(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    /// Drop annotations touched by `edit` and shift the ones after it.
    pub fn on_edit(&mut self, edit: &EditEvent) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.span.overlaps(&edit.span));

        let delta = edit.delta();
        for item in &mut self.items {
            if item.span.start >= edit.span.end {
                item.span = item.span.shifted(delta);
            }
        }
        before - self.items.len()
    }

    /// Remove annotations under the cursor so the text beneath can be edited.
    pub fn reveal_at(&mut self, offset: usize) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.span.touches(offset));
        before - self.items.len()
    }

    /// True when a still-valid annotation rendered under `key` covers exactly this fragment.
    pub fn covers(&self, doc: &dyn DocumentHost, fragment: &Fragment, key: &CacheKey) -> bool {
        self.get(fragment.span).is_some_and(|item| {
            item.key == *key
                && item.original_text == fragment.source
                && doc.text(item.span) == Some(item.original_text.as_str())
        })
    }

    pub fn get(&self, span: Span) -> Option<&Annotation> {
        self.items.iter().find(|item| item.span == span)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
