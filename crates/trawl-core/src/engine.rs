//! The round controller.
//!
//! A job runs in rounds. Each round cuts the remaining requests into
//! rate-limited batches, dispatches them, records every outcome in the
//! [`Tracker`] and keeps only the requests that neither succeeded nor ran out
//! of attempts. A circuit-breaker trip truncates the current batch and arms a
//! rest period before the next round.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::circuit_breaker::CircuitState;
use crate::config::ScrapeConfig;
use crate::dispatch::Dispatcher;
use crate::error::ScrapeError;
use crate::fetch::FetchUnit;
use crate::models::{FetchResult, JobReport, ResultSet, ScrapeOutcome};
use crate::rate_limit::RateLimiter;
use crate::reporter::{Progress, ScrapeEvent, ScrapeReporter, TracingScrapeReporter};
use crate::request::{Payload, Request, RequestKind, RequestSet};
use crate::tracker::Tracker;
use crate::traits::{
    FetchErrorHandler, Fetcher, HeaderGenerator, PostProcessArgs, PostProcessor, ProxyResolver,
};

/// Fetch-and-retry engine.
///
/// Generic over the fetch backend and the post-processor so tests can run
/// the whole round loop without real HTTP.
pub struct Engine<F: Fetcher, P: PostProcessor> {
    fetcher: F,
    post_processor: P,
    config: ScrapeConfig,
    post_process_kwargs: PostProcessArgs,
    error_handler: Option<Arc<dyn FetchErrorHandler>>,
    proxy_resolver: Option<Arc<dyn ProxyResolver>>,
    header_generator: Option<Arc<dyn HeaderGenerator>>,
    /// Generated once at build time; used unless headers are randomised.
    base_headers: Vec<(String, String)>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder<F: Fetcher, P: PostProcessor> {
    fetcher: F,
    post_processor: P,
    config: ScrapeConfig,
    post_process_kwargs: PostProcessArgs,
    error_handler: Option<Arc<dyn FetchErrorHandler>>,
    proxy_resolver: Option<Arc<dyn ProxyResolver>>,
    header_generator: Option<Arc<dyn HeaderGenerator>>,
}

impl<F: Fetcher, P: PostProcessor> EngineBuilder<F, P> {
    pub fn config(mut self, config: ScrapeConfig) -> Self {
        self.config = config;
        self
    }

    /// Extra arguments handed to every post-processor call.
    pub fn post_process_kwargs(mut self, kwargs: PostProcessArgs) -> Self {
        self.post_process_kwargs = kwargs;
        self
    }

    pub fn fetch_error_handler(mut self, handler: impl FetchErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn proxy_resolver(mut self, resolver: impl ProxyResolver + 'static) -> Self {
        self.proxy_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn header_generator(mut self, generator: impl HeaderGenerator + 'static) -> Self {
        self.header_generator = Some(Arc::new(generator));
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<Engine<F, P>, ScrapeError> {
        self.config.validate()?;
        if self.config.use_proxy && self.config.proxy.is_none() && self.proxy_resolver.is_none() {
            return Err(ScrapeError::Config(
                "either a proxy resolver or a proxy must be given when use_proxy is set".into(),
            ));
        }

        let base_headers = self
            .header_generator
            .as_ref()
            .map(|generator| generator.generate())
            .unwrap_or_default();

        Ok(Engine {
            fetcher: self.fetcher,
            post_processor: self.post_processor,
            config: self.config,
            post_process_kwargs: self.post_process_kwargs,
            error_handler: self.error_handler,
            proxy_resolver: self.proxy_resolver,
            header_generator: self.header_generator,
            base_headers,
        })
    }
}

impl<F: Fetcher, P: PostProcessor> Engine<F, P> {
    pub fn builder(fetcher: F, post_processor: P) -> EngineBuilder<F, P> {
        EngineBuilder {
            fetcher,
            post_processor,
            config: ScrapeConfig::default(),
            post_process_kwargs: PostProcessArgs::new(),
            error_handler: None,
            proxy_resolver: None,
            header_generator: None,
        }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    fn unit(&self, kind: RequestKind) -> FetchUnit<'_, P> {
        FetchUnit {
            kind,
            config: &self.config,
            post_processor: &self.post_processor,
            post_process_kwargs: &self.post_process_kwargs,
            proxy_resolver: self.proxy_resolver.as_deref(),
            header_generator: self.header_generator.as_deref(),
            base_headers: &self.base_headers,
            error_handler: self.error_handler.as_deref(),
        }
    }

    /// Scrape every url, retrying failures, and return one outcome per unique
    /// request.
    ///
    /// `payloads` is padded or truncated to the length of `urls`. Empty input
    /// returns immediately without opening a session.
    pub async fn scrape_all(
        &self,
        urls: &[String],
        payloads: Option<&[Option<Payload>]>,
        kind: RequestKind,
    ) -> Result<Vec<ScrapeOutcome<P::Output>>, ScrapeError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let report = self
            .run_job(
                urls,
                payloads,
                kind,
                &CancellationToken::new(),
                &TracingScrapeReporter,
            )
            .await?;
        Ok(report.results)
    }

    /// Run a full scrape job.
    ///
    /// Cancelling `cancel` stops the batch in flight and ends the job after
    /// that round's bookkeeping. Requests that never produced a result are
    /// reported with [`ScrapeError::Cancelled`].
    pub async fn run_job<R: ScrapeReporter + ?Sized>(
        &self,
        urls: &[String],
        payloads: Option<&[Option<Payload>]>,
        kind: RequestKind,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<JobReport<P::Output>, ScrapeError> {
        let job_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut tracker = Tracker::new(self.config.attempt_limit);

        if urls.is_empty() {
            return Ok(JobReport {
                job_id,
                started_at,
                finished_at: Utc::now(),
                rounds: 0,
                results: Vec::new(),
                tracker,
            });
        }

        let requests = RequestSet::build(urls, payloads)?.into_vec();
        reporter.report(ScrapeEvent::JobStarted {
            job_id,
            submitted: urls.len(),
            unique: requests.len(),
        });
        tracker.register(&requests);

        let limiter = RateLimiter::new(self.config.call_rate_limit);
        let dispatcher = Dispatcher::new(
            &self.fetcher,
            self.unit(kind),
            self.config.consecutive_error_limit,
            self.config.max_concurrency,
        );
        let mut circuit = CircuitState::new();
        let mut results = ResultSet::new();
        let mut working = requests.clone();
        let mut rounds = 0;

        while !working.is_empty() && !cancel.is_cancelled() {
            rounds += 1;

            // 1. Partition
            let batches = limiter.batches(&working);
            let batch_count = batches.len();
            reporter.report(ScrapeEvent::RoundStarted {
                round: rounds,
                remaining: working.len(),
                batches: batch_count,
            });

            // 2. Dispatch
            let mut progress = Progress::new(working.len());
            let mut shutdown = false;
            let mut succeeded: Vec<Request> = Vec::new();
            let mut errored: Vec<Request> = Vec::new();
            for (index, batch) in batches.into_iter().enumerate() {
                let started = Instant::now();
                let batch_size = batch.len();
                let outcome = dispatcher
                    .dispatch(batch, &mut circuit, cancel, &mut progress, reporter)
                    .await?;

                if outcome.shutdown {
                    shutdown = true;
                    reporter.report(ScrapeEvent::BatchShutdown {
                        round: rounds,
                        completed: outcome.results.len(),
                        cancelled: outcome.cancelled.len(),
                    });
                }

                // 3. Merge
                for fetched in outcome.results {
                    if fetched.is_success() {
                        succeeded.push(fetched.request.clone());
                    } else {
                        errored.push(fetched.request.clone());
                    }
                    results.insert(fetched);
                }

                if cancel.is_cancelled() {
                    break;
                }
                if index + 1 < batch_count {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = limiter.pause_after(batch_size, started) => {}
                    }
                }
            }

            // 4. Track
            tracker.record(true, &succeeded);
            tracker.record(false, &errored);
            let abandoned = errored
                .iter()
                .filter(|request| tracker.is_exhausted(request))
                .count();

            // 5. Next working set
            let succeeded: HashSet<Request> = succeeded.into_iter().collect();
            working.retain(|request| !succeeded.contains(request) && !tracker.is_exhausted(request));
            reporter.report(ScrapeEvent::RoundCompleted {
                round: rounds,
                scraped: succeeded.len(),
                errored: errored.len(),
                abandoned,
                remaining: working.len(),
            });

            // 6. Rest
            if shutdown
                && !working.is_empty()
                && self.config.rest_between_attempts
                && !cancel.is_cancelled()
            {
                reporter.report(ScrapeEvent::Resting {
                    wait: self.config.rest_wait,
                });
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.config.rest_wait) => {}
                }
            }
        }

        if cancel.is_cancelled() && !working.is_empty() {
            reporter.report(ScrapeEvent::JobAborted {
                job_id,
                unfinished: working.len(),
            });
        }

        for request in &requests {
            if !results.contains(request) {
                results.insert(FetchResult::failure(
                    request.clone(),
                    None,
                    ScrapeError::Cancelled,
                ));
            }
        }

        let finished_at = Utc::now();
        let results = results.into_outcomes();
        reporter.report(ScrapeEvent::JobCompleted {
            job_id,
            failed: tracker.abandoned_count(),
            total: results.len(),
            runtime: finished_at - started_at,
        });

        Ok(JobReport {
            job_id,
            started_at,
            finished_at,
            rounds,
            results,
            tracker,
        })
    }

    /// Scrape a single url outside the round loop.
    ///
    /// Sends a POST when `payload` is given, a GET otherwise. Tries up to
    /// `max(attempt_limit, 1)` times and returns the first success or the
    /// last failure. No rate limiting and no circuit breaker.
    pub async fn scrape_one(
        &self,
        url: &str,
        payload: Option<Payload>,
    ) -> Result<ScrapeOutcome<P::Output>, ScrapeError> {
        let (request, kind) = match payload {
            Some(payload) => (Request::with_payload(url, payload), RequestKind::Post),
            None => (Request::new(url), RequestKind::Get),
        };
        let unit = self.unit(kind);
        let session = self.fetcher.open_session()?;
        let attempts = self.config.attempt_limit.max(1);

        let mut attempt = 1;
        loop {
            let fetched = unit.fetch(&session, request.clone(), None).await?;
            if fetched.is_success() || attempt >= attempts {
                return Ok(fetched.into());
            }
            if self.config.rest_between_attempts {
                tracing::info!(
                    url,
                    attempt,
                    "Sleeping for {} seconds",
                    self.config.rest_wait.as_secs()
                );
                tokio::time::sleep(self.config.rest_wait).await;
            }
            attempt += 1;
        }
    }
}
