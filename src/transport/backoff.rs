//! Reconnect backoff.
//!
//! Three knobs: the delay used before the first successful open, a floor
//! restored after every open, and a ceiling no delay ever exceeds.

use std::time::Duration;

use crate::core::constants::{
    INITIAL_RECONNECT_DELAY, MAX_RECONNECT_DELAY, MIN_RECONNECT_DELAY, RECONNECT_STATUS_TICK,
};

/// Backoff timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay base before the channel has ever opened.
    pub initial: Duration,
    /// Delay base after a successful open.
    pub floor: Duration,
    /// Maximum delay.
    pub ceiling: Duration,
    /// Period of "reconnecting in N sec." status updates; zero disables them.
    pub status_tick: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: INITIAL_RECONNECT_DELAY,
            floor: MIN_RECONNECT_DELAY,
            ceiling: MAX_RECONNECT_DELAY,
            status_tick: RECONNECT_STATUS_TICK,
        }
    }
}

/// Exponential backoff state.
///
/// `current` is the base the next transient failure doubles from.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl Backoff {
    /// Fresh backoff starting at `config.initial`.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial.min(config.ceiling),
            config,
        }
    }

    /// Timing in use.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Current delay base.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the delay, capped at the ceiling, and return it.
    pub fn next_delay(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.config.ceiling);
        self.current
    }

    /// Jump straight to the ceiling and return it.
    pub fn jump_to_ceiling(&mut self) -> Duration {
        self.current = self.config.ceiling;
        self.current
    }

    /// Restore the floor (after a successful open).
    pub fn reset(&mut self) {
        self.current = self.config.floor.min(self.config.ceiling);
    }
}
