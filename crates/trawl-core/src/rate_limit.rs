//! Batch-level call-rate limiting.
//!
//! A round's requests are cut into batches of `call_rate_limit` requests.
//! After every batch but the last, the controller sleeps long enough that
//! the batch took at least `batch_size × 60 / call_rate_limit` seconds, so
//! the realised throughput never exceeds the configured calls per minute.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use trawl_core::rate_limit::RateLimiter;
//!
//! let limiter = RateLimiter::new(Some(10));
//! // A batch of 10 that finished in 1s must wait another 5s.
//! assert_eq!(
//!     limiter.pause_for(10, Duration::from_secs(1)),
//!     Some(Duration::from_secs(5))
//! );
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::request::Request;

const WINDOW: Duration = Duration::from_secs(60);

/// Splits work into batches and computes the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimiter {
    /// Calls allowed per 60-second window. `None` means unlimited.
    call_rate_limit: Option<u32>,
}

impl RateLimiter {
    /// A zero limit is treated as unlimited; [`ScrapeConfig::validate`]
    /// rejects it before an engine is built.
    ///
    /// [`ScrapeConfig::validate`]: crate::config::ScrapeConfig::validate
    pub fn new(call_rate_limit: Option<u32>) -> Self {
        Self {
            call_rate_limit: call_rate_limit.filter(|&limit| limit > 0),
        }
    }

    pub fn call_rate_limit(&self) -> Option<u32> {
        self.call_rate_limit
    }

    /// Partition `requests` into dispatch batches.
    pub fn batches(&self, requests: &[Request]) -> Vec<Vec<Request>> {
        match self.call_rate_limit {
            Some(limit) => requests
                .chunks(limit as usize)
                .map(<[Request]>::to_vec)
                .collect(),
            None if requests.is_empty() => Vec::new(),
            None => vec![requests.to_vec()],
        }
    }

    /// Minimum wall time a batch of `batch_size` calls must take.
    pub fn min_batch_duration(&self, batch_size: usize) -> Duration {
        match self.call_rate_limit {
            Some(limit) => WINDOW.mul_f64(batch_size as f64 / f64::from(limit)),
            None => Duration::ZERO,
        }
    }

    /// How long to sleep after a batch of `batch_size` that took `elapsed`.
    ///
    /// Returns `None` when the batch was already slow enough.
    pub fn pause_for(&self, batch_size: usize, elapsed: Duration) -> Option<Duration> {
        if batch_size == 0 {
            return None;
        }
        let required = self.min_batch_duration(batch_size);
        if elapsed < required {
            Some(required - elapsed)
        } else {
            None
        }
    }

    /// Sleep out the remainder of the batch's minimum duration.
    pub async fn pause_after(&self, batch_size: usize, started: Instant) {
        if let Some(pause) = self.pause_for(batch_size, started.elapsed()) {
            tracing::info!(
                pause_ms = %pause.as_millis(),
                batch_size,
                "Call rate too fast, pausing"
            );
            tokio::time::sleep(pause).await;
        }
    }
}
