use thiserror::Error;

use crate::{application::render::SetupError, config::LoadError, infra::error::InfraError};

/// Top-level error surfaced by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("rendering unavailable: {0}")]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("{failed} fragment(s) failed to compile")]
    Render { failed: usize },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
