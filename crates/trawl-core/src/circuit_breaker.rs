//! Consecutive-error circuit breaker.
//!
//! Stops a batch early once a server starts failing the same way over and
//! over (rate limiting, IP blocking), instead of hammering it with the rest
//! of the batch.
//!
//! # Counting
//!
//! ```text
//! success                     -> count = 0
//! error, same kind as last    -> count += 1
//! error, different kind       -> last = kind, count = 1
//! count >= limit              -> tripped (batch shutdown)
//! ```
//!
//! The state is owned by the dispatch loop of one scrape job and passed by
//! `&mut` into every fetch, so it needs no locking. It persists across
//! batches and rounds of that job; only a success resets the count.

use std::fmt;

use crate::error::{ErrorKind, ScrapeError};

/// Consecutive-error bookkeeping for one scrape job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitState {
    last_error_kind: Option<ErrorKind>,
    consecutive_error_count: u32,
}

impl CircuitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.last_error_kind
    }

    pub fn consecutive_error_count(&self) -> u32 {
        self.consecutive_error_count
    }

    pub fn record_success(&mut self) {
        self.consecutive_error_count = 0;
    }

    /// Count `error` and return the new consecutive count.
    pub fn record_failure(&mut self, error: &ScrapeError) -> u32 {
        let kind = error.kind();
        if self.last_error_kind == Some(kind) {
            self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
        } else {
            self.last_error_kind = Some(kind);
            self.consecutive_error_count = 1;
        }
        self.consecutive_error_count
    }

    /// Whether the count has reached `limit`.
    pub fn is_tripped(&self, limit: u32) -> bool {
        self.consecutive_error_count >= limit
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_error_kind {
            Some(kind) => write!(f, "{} x{}", kind, self.consecutive_error_count),
            None => write!(f, "clean"),
        }
    }
}
