//! Connection state machine for the real-time channel.
//!
//! Pure and synchronous: the channel actor feeds it events and acts on what
//! it returns. The caller's intent (`wants_connection`) is tracked apart from
//! the socket's phase so a reconnect can be requested while a close is still
//! in flight, and a close while a connect is still outstanding.

use std::time::Duration;

use super::backoff::{Backoff, BackoffConfig};
use crate::core::constants::{ERROR_CLOSE_PREFIX, FATAL_CLOSE_PREFIX};

/// Socket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// No socket.
    Idle,
    /// Connect in progress.
    Connecting,
    /// Socket open.
    Open,
    /// Close requested, waiting for the socket to go away.
    Closing,
}

/// How a close reason is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Server-declared fatal condition; never retried.
    Fatal,
    /// Error of unknown cause; retried at the ceiling.
    Error,
    /// Network drop, timeout, connect failure; retried with doubling delay.
    Transient,
}

impl CloseClass {
    /// Classify a close reason by its prefix.
    pub fn of(reason: &str) -> Self {
        if reason.starts_with(FATAL_CLOSE_PREFIX) {
            Self::Fatal
        } else if reason.starts_with(ERROR_CLOSE_PREFIX) {
            Self::Error
        } else {
            Self::Transient
        }
    }
}

/// What the actor should do after the socket went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nobody wants a connection; stay idle.
    Idle,
    /// Fatal close; surface the reason and stay idle.
    Fatal {
        /// Reason as sent by the server.
        reason: String,
    },
    /// Retry after `delay`.
    Retry {
        /// Delay before the next connect.
        delay: Duration,
        /// Reason as sent by the server, or the connect error.
        reason: String,
    },
}

/// Reconnect state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    phase: ChannelPhase,
    wants_connection: bool,
    backoff: Backoff,
    close_reason: Option<String>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl ConnectionMachine {
    /// Idle machine with the given timing.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            phase: ChannelPhase::Idle,
            wants_connection: false,
            backoff: Backoff::new(config),
            close_reason: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    /// Whether the caller wants a connection.
    pub fn wants_connection(&self) -> bool {
        self.wants_connection
    }

    /// Whether the socket is open.
    pub fn is_open(&self) -> bool {
        self.phase == ChannelPhase::Open
    }

    /// Reason of the last unexpected close, cleared on open.
    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    /// Backoff state.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Record intent to connect.
    ///
    /// Returns `true` if the caller must start a connect now.
    pub fn ensure_connected(&mut self) -> bool {
        self.wants_connection = true;
        self.start_if_idle()
    }

    /// The retry delay elapsed.
    ///
    /// Returns `true` if the caller must start a connect now.
    pub fn retry_due(&mut self) -> bool {
        self.wants_connection && self.start_if_idle()
    }

    fn start_if_idle(&mut self) -> bool {
        if self.phase == ChannelPhase::Idle {
            self.phase = ChannelPhase::Connecting;
            true
        } else {
            false
        }
    }

    /// A connect finished.
    ///
    /// Returns `true` if the socket should be kept; `false` means intent
    /// was withdrawn meanwhile and the socket must be dropped.
    pub fn on_connected(&mut self) -> bool {
        if self.wants_connection {
            self.phase = ChannelPhase::Open;
            self.backoff.reset();
            self.close_reason = None;
            true
        } else {
            self.phase = ChannelPhase::Idle;
            false
        }
    }

    /// The socket closed or a connect failed.
    pub fn on_closed(&mut self, reason: &str) -> CloseOutcome {
        self.phase = ChannelPhase::Idle;
        if !self.wants_connection {
            return CloseOutcome::Idle;
        }
        let delay = match CloseClass::of(reason) {
            CloseClass::Fatal => {
                self.wants_connection = false;
                self.close_reason = Some(reason.to_string());
                return CloseOutcome::Fatal {
                    reason: reason.to_string(),
                };
            }
            CloseClass::Error => self.backoff.jump_to_ceiling(),
            CloseClass::Transient => self.backoff.next_delay(),
        };
        self.close_reason = Some(reason.to_string());
        CloseOutcome::Retry {
            delay,
            reason: reason.to_string(),
        }
    }

    /// Withdraw intent to connect.
    ///
    /// Returns `true` if a socket is open or connecting and must be closed.
    pub fn close(&mut self) -> bool {
        self.wants_connection = false;
        match self.phase {
            ChannelPhase::Open | ChannelPhase::Connecting => {
                self.phase = ChannelPhase::Closing;
                true
            }
            ChannelPhase::Closing => true,
            ChannelPhase::Idle => false,
        }
    }
}
