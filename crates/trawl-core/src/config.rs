use std::collections::HashSet;
use std::time::Duration;

use crate::error::{ErrorKind, ScrapeError};

/// Tuning knobs of a scrape engine.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Same-kind errors in a row before the current batch is shut down.
    pub consecutive_error_limit: u32,
    /// Rounds a request may be tried before it is abandoned.
    pub attempt_limit: u32,
    /// Rest between rounds after a batch shutdown.
    pub rest_between_attempts: bool,
    pub rest_wait: Duration,
    /// Calls per minute. Enforced per batch, so a limit larger than the
    /// number of requests applies no limiting at all.
    pub call_rate_limit: Option<u32>,
    /// Regenerate headers before every fetch.
    pub randomise_headers: bool,
    pub use_proxy: bool,
    /// Explicit proxy; takes precedence over any proxy resolver.
    pub proxy: Option<String>,
    /// Upper bound on in-flight fetches within a batch.
    pub max_concurrency: Option<usize>,
    /// Error kinds that are recorded as warnings and never abort a job.
    pub acceptable_errors: HashSet<ErrorKind>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            consecutive_error_limit: 100,
            attempt_limit: 5,
            rest_between_attempts: true,
            rest_wait: Duration::from_secs(60),
            call_rate_limit: None,
            randomise_headers: false,
            use_proxy: false,
            proxy: None,
            max_concurrency: None,
            acceptable_errors: ErrorKind::default_acceptable().into_iter().collect(),
        }
    }
}

impl ScrapeConfig {
    pub fn with_consecutive_error_limit(mut self, limit: u32) -> Self {
        self.consecutive_error_limit = limit;
        self
    }

    pub fn with_attempt_limit(mut self, limit: u32) -> Self {
        self.attempt_limit = limit;
        self
    }

    /// Rest `wait` between rounds after a batch shutdown.
    pub fn with_rest(mut self, wait: Duration) -> Self {
        self.rest_between_attempts = true;
        self.rest_wait = wait;
        self
    }

    pub fn without_rest(mut self) -> Self {
        self.rest_between_attempts = false;
        self
    }

    pub fn with_call_rate_limit(mut self, calls_per_minute: u32) -> Self {
        self.call_rate_limit = Some(calls_per_minute);
        self
    }

    pub fn with_randomised_headers(mut self) -> Self {
        self.randomise_headers = true;
        self
    }

    /// Route requests through `proxy`.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.use_proxy = true;
        self.proxy = Some(proxy.into());
        self
    }

    /// Route requests through whatever the engine's proxy resolver returns.
    pub fn with_resolved_proxy(mut self) -> Self {
        self.use_proxy = true;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn with_acceptable_errors(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.acceptable_errors = kinds.into_iter().collect();
        self
    }

    pub fn is_acceptable(&self, error: &ScrapeError) -> bool {
        self.acceptable_errors.contains(&error.kind())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.call_rate_limit == Some(0) {
            return Err(ScrapeError::Config(
                "call_rate_limit must be at least 1 call per minute".into(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(ScrapeError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
