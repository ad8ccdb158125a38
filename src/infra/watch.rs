//! File-backed document host for the CLI.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::domain::{EditEvent, TextBuffer};

use super::error::InfraError;

pub async fn load_buffer(path: &Path) -> Result<TextBuffer, InfraError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| InfraError::read(path, err))?;
    Ok(TextBuffer::new(text))
}

/// Polls a file and folds external changes into a [`TextBuffer`] as edits.
pub struct FilePoller {
    path: PathBuf,
    ticker: Interval,
}

impl FilePoller {
    pub fn new(path: impl Into<PathBuf>, every: Duration) -> Self {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            path: path.into(),
            ticker,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn tick(&mut self) {
        self.ticker.tick().await;
    }

    /// Re-read the file and apply any difference to `buffer`.
    pub async fn refresh(&self, buffer: &mut TextBuffer) -> Result<Option<EditEvent>, InfraError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| InfraError::read(&self.path, err))?;
        Ok(buffer.sync_to(&text))
    }
}
