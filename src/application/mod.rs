//! Application services: harvesting, compilation, scanning and reconciliation.

pub mod annotations;
pub mod context;
pub mod error;
pub mod render;
pub mod report;
pub mod scan;
pub mod session;

pub use annotations::{Annotation, AnnotationSet, ApplyOutcome};
pub use context::{ContextHarvester, GlobalContext, HarvestRules};
pub use report::{Diagnostic, ErrorReporter};
pub use scan::{Debouncer, ScanMode, ScanReport};
pub use session::{Progress, Session, SessionConfig, SessionEvent, SettleSummary};
