//! Connection status line plus a rolling error log.

use std::collections::VecDeque;

use crate::core::constants::{ERRORS_SHOWN, ERROR_LOG_CAPACITY};

/// What the user sees about the connection.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    status: String,
    errors: VecDeque<String>,
    capacity: usize,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(ERROR_LOG_CAPACITY)
    }
}

impl StatusBoard {
    /// Board keeping at most `capacity` errors.
    pub fn new(capacity: usize) -> Self {
        Self {
            status: String::new(),
            errors: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Replace the status line.
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    /// Current status line.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Append an error, evicting the oldest when full.
    pub fn push_error(&mut self, error: impl Into<String>) {
        if self.errors.len() == self.capacity {
            self.errors.pop_front();
        }
        self.errors.push_back(error.into());
    }

    /// Errors, oldest first.
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    /// Last few errors, then the status line.
    pub fn render(&self) -> String {
        let skip = self.errors.len().saturating_sub(ERRORS_SHOWN);
        self.errors
            .iter()
            .skip(skip)
            .map(String::as_str)
            .chain((!self.status.is_empty()).then_some(self.status.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
