//! Domain layer types and invariants.

pub mod document;
pub mod error;
pub mod span;
pub mod syntax;

pub use document::{DocumentHost, EditEvent, Fragment, TextBuffer};
pub use span::Span;
pub use syntax::{DollarMath, FragmentSyntax};
