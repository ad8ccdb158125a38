//! Scan scheduling: idle debounce and per-pass bookkeeping.

use std::{future, time::Duration};

use serde::Deserialize;
use tokio::time::{Instant, sleep_until};

/// How aggressively a session reacts to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Rescan after every quiet period and reveal source under the cursor.
    #[default]
    Automatic,
    /// Only explicit scan requests run.
    Manual,
}

/// Tally of one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub found: usize,
    /// Skipped because the cursor sits inside the fragment.
    pub editing: usize,
    /// Skipped because a valid annotation already covers it.
    pub annotated: usize,
    /// Annotated under a different global context; rendered again.
    pub outdated: usize,
    /// Waiting on a running job for the same key.
    pub in_flight: usize,
    pub cached: usize,
    pub spawned: usize,
}

/// Single-deadline idle timer.
///
/// Re-arming replaces the previous deadline, so a burst of activity results in
/// one scan once the document has been quiet for `delay`.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves at the deadline; never resolves while disarmed.
    pub async fn elapsed(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rearming_pushes_the_deadline_back() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        debouncer.arm();
        let first = debouncer.deadline().expect("armed");

        tokio::time::advance(Duration::from_millis(300)).await;
        debouncer.arm();
        let second = debouncer.deadline().expect("armed");

        assert_eq!(second - first, Duration::from_millis(300));
        debouncer.elapsed().await;
        assert!(Instant::now() >= second);
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        debouncer.arm();
        debouncer.disarm();

        let fired = tokio::time::timeout(Duration::from_secs(60), debouncer.elapsed()).await;
        assert!(fired.is_err());
    }

    #[test]
    fn mode_deserializes_lowercase() {
        use serde::de::{IntoDeserializer, value::Error};

        let mode: Result<ScanMode, Error> = ScanMode::deserialize("manual".into_deserializer());
        assert_eq!(mode.expect("valid mode"), ScanMode::Manual);
    }
}
