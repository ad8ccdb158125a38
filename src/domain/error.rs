use thiserror::Error;

use super::span::Span;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("span {span} exceeds document length {len}")]
    OutOfBounds { span: Span, len: usize },
    #[error("span {span} does not fall on a character boundary")]
    CharBoundary { span: Span },
}

impl DomainError {
    pub fn out_of_bounds(span: Span, len: usize) -> Self {
        Self::OutOfBounds { span, len }
    }

    pub fn char_boundary(span: Span) -> Self {
        Self::CharBoundary { span }
    }
}
