//! Host document boundary.
//!
//! The editing surface itself lives outside this crate. [`DocumentHost`] is the
//! narrow read-only view the rendering core needs, and [`TextBuffer`] is the
//! in-memory implementation used by the CLI and the tests.

use super::error::DomainError;
use super::span::Span;

/// Read-only view of a live document.
pub trait DocumentHost {
    /// Document length in bytes.
    fn len(&self) -> usize;

    /// Text at `span`, or `None` when the span is out of bounds or splits a character.
    fn text(&self, span: Span) -> Option<&str>;

    /// Region currently shown to the user.
    fn visible_region(&self) -> Span;

    /// Current edit point. Headless hosts have none.
    fn cursor(&self) -> Option<usize>;

    /// Modification counter; strictly increases on every mutation.
    fn version(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn full_span(&self) -> Span {
        Span::new(0, self.len())
    }
}

/// A recognised fragment of embedded markup. Recreated on every scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub span: Span,
    pub source: String,
}

impl Fragment {
    pub fn new(span: Span, source: impl Into<String>) -> Self {
        Self {
            span,
            source: source.into(),
        }
    }
}

/// Notification that `span` (pre-edit coordinates) was replaced by `inserted` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditEvent {
    pub span: Span,
    pub inserted: usize,
}

impl EditEvent {
    /// Signed change in document length caused by the edit.
    pub fn delta(&self) -> isize {
        self.inserted as isize - self.span.len() as isize
    }

    /// Region the edit occupies after it was applied.
    pub fn post_edit_span(&self) -> Span {
        Span::new(self.span.start, self.span.start + self.inserted)
    }
}

/// Plain in-memory document with an explicit version counter.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    text: String,
    version: u64,
    cursor: Option<usize>,
    visible: Option<Span>,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn set_cursor(&mut self, cursor: Option<usize>) {
        self.cursor = cursor.map(|offset| offset.min(self.text.len()));
    }

    /// Restrict the visible region. `None` shows the whole document.
    pub fn set_visible(&mut self, visible: Option<Span>) {
        self.visible = visible;
    }

    /// Replace `span` with `replacement`, bumping the version.
    pub fn replace(&mut self, span: Span, replacement: &str) -> Result<EditEvent, DomainError> {
        if span.end > self.text.len() {
            return Err(DomainError::out_of_bounds(span, self.text.len()));
        }
        if !self.text.is_char_boundary(span.start) || !self.text.is_char_boundary(span.end) {
            return Err(DomainError::char_boundary(span));
        }

        self.text.replace_range(span.start..span.end, replacement);
        self.version += 1;

        let event = EditEvent {
            span,
            inserted: replacement.len(),
        };
        if let Some(cursor) = self.cursor {
            self.cursor = Some(shift_offset(cursor, &event));
        }
        Ok(event)
    }

    pub fn insert(&mut self, offset: usize, text: &str) -> Result<EditEvent, DomainError> {
        self.replace(Span::new(offset, offset), text)
    }

    pub fn delete(&mut self, span: Span) -> Result<EditEvent, DomainError> {
        self.replace(span, "")
    }

    /// Bring the buffer in line with `updated` using one minimal replacement.
    ///
    /// Returns `None` when the contents are already identical.
    pub fn sync_to(&mut self, updated: &str) -> Option<EditEvent> {
        if self.text == updated {
            return None;
        }

        let old = self.text.as_bytes();
        let new = updated.as_bytes();

        let mut prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
        while !self.text.is_char_boundary(prefix) || !updated.is_char_boundary(prefix) {
            prefix -= 1;
        }

        let max_suffix = old.len().min(new.len()) - prefix;
        let mut suffix = old
            .iter()
            .rev()
            .zip(new.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();
        while !self.text.is_char_boundary(old.len() - suffix)
            || !updated.is_char_boundary(new.len() - suffix)
        {
            suffix -= 1;
        }

        let span = Span::new(prefix, old.len() - suffix);
        let replacement = &updated[prefix..new.len() - suffix];
        self.replace(span, replacement).ok()
    }
}

fn shift_offset(offset: usize, event: &EditEvent) -> usize {
    if offset <= event.span.start {
        offset
    } else if offset >= event.span.end {
        offset.saturating_add_signed(event.delta())
    } else {
        event.span.start + event.inserted
    }
}

impl DocumentHost for TextBuffer {
    fn len(&self) -> usize {
        self.text.len()
    }

    fn text(&self, span: Span) -> Option<&str> {
        self.text.get(span.start..span.end)
    }

    fn visible_region(&self) -> Span {
        let full = self.full_span();
        match self.visible {
            Some(region) => Span::new(region.start.min(full.end), region.end.min(full.end)),
            None => full,
        }
    }

    fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    fn version(&self) -> u64 {
        self.version
    }
}
