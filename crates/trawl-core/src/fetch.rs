//! The fetch unit: one request through proxy resolution, the session,
//! post-processing and error classification.
//!
//! A fetch is split in two phases so that many fetches can be in flight at
//! once while circuit-breaker state stays owned by a single caller:
//!
//! 1. [`FetchUnit::attempt`] does the I/O and post-processing. It borrows
//!    nothing mutable and can run concurrently.
//! 2. [`FetchUnit::settle`] classifies the outcome, updates the
//!    [`CircuitState`], runs the error handler and decides whether the error
//!    is recorded or re-raised. It runs on the dispatch loop, one attempt at
//!    a time.

use crate::circuit_breaker::CircuitState;
use crate::config::ScrapeConfig;
use crate::dispatch::Shutdown;
use crate::error::ScrapeError;
use crate::models::{FetchResult, HttpRequest};
use crate::request::{Request, RequestKind};
use crate::traits::{
    FetchErrorHandler, FetchSession, HeaderGenerator, PostProcessArgs, PostProcessor,
    ProxyResolver,
};

/// Raw outcome of [`FetchUnit::attempt`], not yet classified.
#[derive(Debug)]
pub struct Attempt<T> {
    pub request: Request,
    pub status: Option<u16>,
    pub outcome: Result<T, ScrapeError>,
}

/// Circuit-breaker context for [`FetchUnit::settle`].
pub struct Breaker<'a> {
    pub state: &'a mut CircuitState,
    pub limit: u32,
    pub shutdown: &'a mut Shutdown,
}

/// Borrowed view of an engine's collaborators, bound to one request kind.
pub struct FetchUnit<'a, P: PostProcessor> {
    pub(crate) kind: RequestKind,
    pub(crate) config: &'a ScrapeConfig,
    pub(crate) post_processor: &'a P,
    pub(crate) post_process_kwargs: &'a PostProcessArgs,
    pub(crate) proxy_resolver: Option<&'a dyn ProxyResolver>,
    pub(crate) header_generator: Option<&'a dyn HeaderGenerator>,
    pub(crate) base_headers: &'a [(String, String)],
    pub(crate) error_handler: Option<&'a dyn FetchErrorHandler>,
}

impl<'a, P: PostProcessor> FetchUnit<'a, P> {
    /// Outbound proxy for `url`. An explicit proxy wins over the resolver.
    pub fn resolve_proxy(&self, url: &str) -> Result<Option<String>, ScrapeError> {
        if !self.config.use_proxy {
            return Ok(None);
        }
        if let Some(proxy) = &self.config.proxy {
            return Ok(Some(proxy.clone()));
        }
        match self.proxy_resolver {
            Some(resolver) => resolver.resolve(url),
            None => Err(ScrapeError::Config(
                "either a proxy resolver or a proxy must be given when use_proxy is set".into(),
            )),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        match self.header_generator {
            Some(generator) if self.config.randomise_headers => generator.generate(),
            _ => self.base_headers.to_vec(),
        }
    }

    fn build_request(&self, request: &Request) -> Result<HttpRequest, ScrapeError> {
        let body = match self.kind {
            RequestKind::Get => None,
            RequestKind::Post => request.payload.as_ref().map(|p| p.to_json()),
        };
        Ok(HttpRequest {
            method: self.kind,
            url: request.url.clone(),
            body,
            headers: self.headers(),
            proxy: self.resolve_proxy(&request.url)?,
        })
    }

    /// Issue the request and post-process a 200 response.
    ///
    /// Non-200 responses become [`ScrapeError::HttpStatus`] so they flow
    /// through the same path as transport failures.
    pub async fn attempt<S: FetchSession>(
        &self,
        session: &S,
        request: Request,
    ) -> Attempt<P::Output> {
        let (status, outcome) = match self.build_request(&request) {
            Ok(http) => match session.send(&http).await {
                Ok(response) if response.status == 200 => (
                    Some(response.status),
                    self.post_processor.process(
                        response.text(),
                        &response,
                        self.post_process_kwargs,
                    ),
                ),
                Ok(response) => (
                    Some(response.status),
                    Err(ScrapeError::HttpStatus(response.status)),
                ),
                Err(e) => (None, Err(e)),
            },
            Err(e) => (None, Err(e)),
        };

        Attempt {
            request,
            status,
            outcome,
        }
    }

    /// Classify an attempt.
    ///
    /// Returns `Err` only when the error handler fails or when an
    /// unacceptable error carries an empty description.
    pub fn settle(
        &self,
        attempt: Attempt<P::Output>,
        breaker: Option<Breaker<'_>>,
    ) -> Result<FetchResult<P::Output>, ScrapeError> {
        let Attempt {
            request,
            status,
            outcome,
        } = attempt;

        let error = match outcome {
            Ok(result) => {
                if let Some(Breaker { state, .. }) = breaker {
                    state.record_success();
                }
                return Ok(FetchResult::success(request, result, status.unwrap_or(200)));
            }
            Err(e) => e,
        };

        if let Some(Breaker {
            state,
            limit,
            shutdown,
        }) = breaker
        {
            let count = state.record_failure(&error);
            if state.is_tripped(limit) && shutdown.trigger() {
                tracing::warn!(
                    url = %request.url,
                    error = %error,
                    "Consecutive error limit reached - consecutive count at {count}/{limit}"
                );
            }
        }

        if let Some(handler) = self.error_handler {
            tracing::info!(url = %request.url, "Error passed to fetch error handler");
            handler.handle(&request.url, &error)?;
        }

        if self.config.is_acceptable(&error) {
            tracing::warn!(
                request = %request,
                error = %error,
                "Acceptable error in request or post processing"
            );
        } else {
            tracing::error!(
                request = %request,
                error = %error,
                kind = %error.kind(),
                "Unhandled error in request or post processing"
            );
            if error.description().is_empty() {
                return Err(error);
            }
        }

        Ok(FetchResult::failure(request, status, error))
    }

    /// Attempt and settle in one go, for callers that fetch one request at
    /// a time.
    pub async fn fetch<S: FetchSession>(
        &self,
        session: &S,
        request: Request,
        breaker: Option<Breaker<'_>>,
    ) -> Result<FetchResult<P::Output>, ScrapeError> {
        let attempt = self.attempt(session, request).await;
        self.settle(attempt, breaker)
    }
}
