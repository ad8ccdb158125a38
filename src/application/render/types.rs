use std::{fmt, io, path::PathBuf, time::Duration};

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::Fragment;

/// Content hash of `preamble ++ context ++ fragment`, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash the exact bytes the compiler will see.
    pub fn of_source(full_source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(full_source.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concatenate the three compile inputs in their fixed order.
pub fn assemble_source(preamble: &str, context: &str, fragment: &str) -> String {
    let mut full = String::with_capacity(preamble.len() + context.len() + fragment.len());
    full.push_str(preamble);
    full.push_str(context);
    full.push_str(fragment);
    full
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a compile job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for a concurrency permit.
    Pending,
    /// External compiler process is running.
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to prepare compiler input: {0}")]
    Io(io::Error),
    #[error("failed to spawn compiler: {0}")]
    Spawn(io::Error),
    #[error("compiler finished ({status}) without producing an artifact")]
    NoArtifact { status: String },
    #[error("compiler timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// A failed compilation with everything needed to explain it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CompileFailure {
    #[source]
    pub error: CompileError,
    /// Exact source handed to the compiler.
    pub source_text: String,
    /// Captured diagnostic stream.
    pub diagnostics: String,
}

/// Completion delivered back to the owning session.
#[derive(Debug)]
pub struct CompileOutcome {
    pub job_id: JobId,
    pub fragment: Fragment,
    pub key: CacheKey,
    pub result: Result<PathBuf, CompileFailure>,
}

/// Events emitted by job tasks onto the session channel.
#[derive(Debug)]
pub enum JobEvent {
    Started(JobId),
    Finished(CompileOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_for_identical_inputs() {
        let a = CacheKey::of_source(&assemble_source("#set page(width: auto)\n", "#let k = 2\n", "$k$"));
        let b = CacheKey::of_source(&assemble_source("#set page(width: auto)\n", "#let k = 2\n", "$k$"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_changes_with_context() {
        let before = CacheKey::of_source(&assemble_source("", "#let k = 2\n", "$k$"));
        let after = CacheKey::of_source(&assemble_source("", "#let k = 3\n", "$k$"));
        assert_ne!(before, after);
    }

    #[test]
    fn key_matches_plain_sha256() {
        let key = CacheKey::of_source("abc");
        assert_eq!(
            key.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }
}
