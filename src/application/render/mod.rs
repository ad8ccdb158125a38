//! Fragment compilation: content-addressed cache, compile dispatch and job tracking.
//!
//! The dispatcher never blocks. A cache hit resolves synchronously; a miss
//! spawns a supervising task whose completion arrives as a [`JobEvent`] on the
//! owning session's channel.

mod cache;
mod compiler;
mod jobs;
mod types;

pub use cache::ArtifactCache;
pub use compiler::{Compiler, CompilerConfig, DEFAULT_PREAMBLE, Dispatch, SetupError};
pub use jobs::{CompileJob, JobRegistry};
pub use types::{
    CacheKey, CompileError, CompileFailure, CompileOutcome, JobEvent, JobId, JobState,
    assemble_source,
};

pub const METRIC_COMPILE_CACHE_HIT: &str = "fragview_compile_cache_hit_total";
pub const METRIC_COMPILE_CACHE_MISS: &str = "fragview_compile_cache_miss_total";
pub const METRIC_COMPILE_FAILURE: &str = "fragview_compile_failure_total";
pub const METRIC_ANNOTATION_ATTACHED: &str = "fragview_annotation_attached_total";
pub const METRIC_ANNOTATION_STALE: &str = "fragview_annotation_stale_total";
