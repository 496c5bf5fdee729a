//! Pause bookkeeping and the virtual clock

use std::time::Duration;

/// Tracks paused spans so virtual time excludes them.
///
/// All readings take the real elapsed time since room start as input.
#[derive(Debug, Clone, Default)]
pub struct PauseController {
    paused_since: Option<Duration>,
    accumulated: Duration,
}

impl PauseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since.is_some()
    }

    /// Total completed pause time
    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    /// Flip the paused flag, returns the new state
    pub fn toggle(&mut self, real_now: Duration) -> bool {
        match self.paused_since.take() {
            Some(started) => {
                self.accumulated += real_now.saturating_sub(started);
                false
            }
            None => {
                self.paused_since = Some(real_now);
                true
            }
        }
    }

    /// Real elapsed time minus every paused span, including one in progress
    pub fn virtual_now(&self, real_now: Duration) -> Duration {
        let in_progress = self
            .paused_since
            .map(|started| real_now.saturating_sub(started))
            .unwrap_or(Duration::ZERO);
        real_now
            .saturating_sub(self.accumulated)
            .saturating_sub(in_progress)
    }

    /// Real time at which a virtual instant will be reached, `None` while paused
    pub fn real_deadline(&self, virtual_at: Duration) -> Option<Duration> {
        if self.is_paused() {
            None
        } else {
            Some(virtual_at + self.accumulated)
        }
    }
}
