//! Concurrent dispatch of one batch.
//!
//! Every fetch of a batch runs on the calling task through a
//! [`FuturesUnordered`], sharing one [`FetchSession`]. A circuit-breaker trip
//! cancels the batch token: results already settled are kept, fetches still
//! in flight are dropped and reported back as cancelled.

use std::collections::HashSet;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitState;
use crate::error::ScrapeError;
use crate::fetch::{Breaker, FetchUnit};
use crate::models::FetchResult;
use crate::reporter::{Progress, ScrapeReporter};
use crate::request::Request;
use crate::traits::{Fetcher, PostProcessor};

/// Batch-scoped shutdown switch.
#[derive(Debug)]
pub struct Shutdown {
    token: CancellationToken,
    initiated: bool,
}

impl Shutdown {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            initiated: false,
        }
    }

    /// Cancel the batch. Returns false if it was already shut down.
    pub fn trigger(&mut self) -> bool {
        if self.initiated {
            return false;
        }
        self.initiated = true;
        tracing::info!("Shutdown of scrape initialized ...");
        self.token.cancel();
        true
    }

    pub fn is_initiated(&self) -> bool {
        self.initiated
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// What came back from one batch.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Settled results, in completion order.
    pub results: Vec<FetchResult<T>>,
    /// Requests whose fetch was dropped before it finished.
    pub cancelled: Vec<Request>,
    /// Whether the circuit breaker shut the batch down.
    pub shutdown: bool,
}

/// Fans a batch out over one session.
pub struct Dispatcher<'a, F: Fetcher, P: PostProcessor> {
    fetcher: &'a F,
    unit: FetchUnit<'a, P>,
    consecutive_error_limit: u32,
    max_concurrency: Option<usize>,
}

impl<'a, F: Fetcher, P: PostProcessor> Dispatcher<'a, F, P> {
    pub fn new(
        fetcher: &'a F,
        unit: FetchUnit<'a, P>,
        consecutive_error_limit: u32,
        max_concurrency: Option<usize>,
    ) -> Self {
        Self {
            fetcher,
            unit,
            consecutive_error_limit,
            max_concurrency,
        }
    }

    /// Fetch every request of `batch` concurrently.
    ///
    /// Stops early when the circuit trips or `job_token` is cancelled. An
    /// `Err` aborts the batch; the session is released on every path.
    pub async fn dispatch<R: ScrapeReporter + ?Sized>(
        &self,
        batch: Vec<Request>,
        circuit: &mut CircuitState,
        job_token: &CancellationToken,
        progress: &mut Progress,
        reporter: &R,
    ) -> Result<BatchOutcome<P::Output>, ScrapeError> {
        let session = self.fetcher.open_session()?;
        let mut shutdown = Shutdown::new(job_token.child_token());

        let mut pending = batch.clone().into_iter();
        let mut in_flight = FuturesUnordered::new();
        let fan_out = self.max_concurrency.unwrap_or(usize::MAX);
        for request in pending.by_ref().take(fan_out) {
            in_flight.push(self.unit.attempt(&session, request));
        }

        let mut results = Vec::with_capacity(batch.len());
        loop {
            let attempt = tokio::select! {
                biased;
                () = shutdown.token().cancelled() => break,
                next = in_flight.next() => match next {
                    Some(attempt) => attempt,
                    None => break,
                },
            };

            let result = self.unit.settle(
                attempt,
                Some(Breaker {
                    state: &mut *circuit,
                    limit: self.consecutive_error_limit,
                    shutdown: &mut shutdown,
                }),
            )?;
            results.push(result);
            reporter.report(progress.increment());

            if !shutdown.is_initiated()
                && let Some(request) = pending.next()
            {
                in_flight.push(self.unit.attempt(&session, request));
            }
        }
        drop(in_flight);

        let settled: HashSet<&Request> = results.iter().map(|r| &r.request).collect();
        let cancelled: Vec<Request> = batch
            .iter()
            .filter(|r| !settled.contains(r))
            .cloned()
            .collect();

        Ok(BatchOutcome {
            shutdown: shutdown.is_initiated(),
            results,
            cancelled,
        })
    }
}
