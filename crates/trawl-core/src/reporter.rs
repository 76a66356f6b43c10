use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;
use uuid::Uuid;

/// Events emitted by the engine for monitoring/logging.
#[derive(Debug, Clone)]
pub enum ScrapeEvent {
    JobStarted {
        job_id: Uuid,
        submitted: usize,
        unique: usize,
    },
    RoundStarted {
        round: u32,
        remaining: usize,
        batches: usize,
    },
    PageProcessed {
        processed: usize,
        total: usize,
        estimated_finish: DateTime<Utc>,
    },
    BatchShutdown {
        round: u32,
        completed: usize,
        cancelled: usize,
    },
    RoundCompleted {
        round: u32,
        scraped: usize,
        errored: usize,
        abandoned: usize,
        remaining: usize,
    },
    Resting {
        wait: Duration,
    },
    JobAborted {
        job_id: Uuid,
        unfinished: usize,
    },
    JobCompleted {
        job_id: Uuid,
        /// Requests abandoned at the attempt limit.
        failed: usize,
        total: usize,
        runtime: TimeDelta,
    },
}

/// Trait for receiving engine events (decoupled logging).
pub trait ScrapeReporter: Send + Sync {
    fn report(&self, event: ScrapeEvent) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingScrapeReporter;

impl ScrapeReporter for TracingScrapeReporter {
    fn report(&self, event: ScrapeEvent) {
        match event {
            ScrapeEvent::JobStarted {
                job_id,
                submitted,
                unique,
            } => {
                tracing::info!(%job_id, "{unique} unique urls from {submitted}");
            }
            ScrapeEvent::RoundStarted {
                round,
                remaining,
                batches,
            } => {
                tracing::info!(round, remaining, batches, "Round started");
            }
            ScrapeEvent::PageProcessed {
                processed,
                total,
                estimated_finish,
            } => {
                tracing::debug!(
                    "processed -> {processed}/{total} - est finish {}",
                    estimated_finish.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            ScrapeEvent::BatchShutdown {
                round,
                completed,
                cancelled,
            } => {
                tracing::warn!(round, completed, cancelled, "Batch shut down early");
            }
            ScrapeEvent::RoundCompleted {
                round,
                scraped,
                errored,
                abandoned,
                remaining,
            } => {
                tracing::info!(
                    round,
                    scraped,
                    errored,
                    abandoned,
                    remaining,
                    "Scraping round complete"
                );
            }
            ScrapeEvent::Resting { wait } => {
                tracing::info!("Sleeping for {} seconds", wait.as_secs());
            }
            ScrapeEvent::JobAborted { job_id, unfinished } => {
                tracing::warn!(%job_id, unfinished, "Scrape job aborted");
            }
            ScrapeEvent::JobCompleted {
                job_id,
                failed,
                total,
                runtime,
            } => {
                tracing::info!(
                    %job_id,
                    runtime_ms = runtime.num_milliseconds(),
                    "Scraping complete {failed}/{total} reqs failed"
                );
            }
        }
    }
}

/// Per-round progress counter with a naive finish-time estimate.
#[derive(Debug, Clone)]
pub struct Progress {
    started: Instant,
    total: usize,
    processed: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            started: Instant::now(),
            total,
            processed: 0,
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Count one finished page and build the matching event.
    pub fn increment(&mut self) -> ScrapeEvent {
        self.processed += 1;
        ScrapeEvent::PageProcessed {
            processed: self.processed,
            total: self.total,
            estimated_finish: self.estimated_finish(),
        }
    }

    fn estimated_finish(&self) -> DateTime<Utc> {
        let left = self.total.saturating_sub(self.processed) as u32;
        let per_page = self
            .started
            .elapsed()
            .checked_div(self.processed.max(1) as u32)
            .unwrap_or_default();
        let remaining = TimeDelta::from_std(per_page * left).unwrap_or(TimeDelta::zero());
        Utc::now() + remaining
    }
}
