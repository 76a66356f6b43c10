use std::future::Future;

use crate::error::ScrapeError;
use crate::models::{HttpRequest, HttpResponse};

/// Keyword arguments handed unchanged to every [`PostProcessor`] call.
pub type PostProcessArgs = serde_json::Map<String, serde_json::Value>;

/// Opens batch-scoped HTTP sessions.
///
/// One session is opened per dispatched batch and dropped when the batch
/// ends, whether it completed, was cancelled or failed. Implementations
/// release pooled connections in `Drop`.
pub trait Fetcher: Send + Sync {
    type Session: FetchSession;

    fn open_session(&self) -> Result<Self::Session, ScrapeError>;
}

/// Issues single HTTP calls on a shared connection pool.
pub trait FetchSession: Send + Sync {
    /// Send one request. Any received response is `Ok`, whatever its status;
    /// only transport failures are `Err`.
    fn send(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, ScrapeError>> + Send;
}

/// Turns a successful (HTTP 200) response into the caller's result type.
pub trait PostProcessor: Send + Sync {
    type Output: Send;

    fn process(
        &self,
        html: &str,
        response: &HttpResponse,
        kwargs: &PostProcessArgs,
    ) -> Result<Self::Output, ScrapeError>;
}

impl<F, T> PostProcessor for F
where
    F: Fn(&str, &HttpResponse, &PostProcessArgs) -> Result<T, ScrapeError> + Send + Sync,
    T: Send,
{
    type Output = T;

    fn process(
        &self,
        html: &str,
        response: &HttpResponse,
        kwargs: &PostProcessArgs,
    ) -> Result<T, ScrapeError> {
        self(html, response, kwargs)
    }
}

/// Resolves the outbound proxy for a URL (PAC lookups and the like).
pub trait ProxyResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Result<Option<String>, ScrapeError>;
}

impl<F> ProxyResolver for F
where
    F: Fn(&str) -> Result<Option<String>, ScrapeError> + Send + Sync,
{
    fn resolve(&self, url: &str) -> Result<Option<String>, ScrapeError> {
        self(url)
    }
}

/// Produces a request header set.
pub trait HeaderGenerator: Send + Sync {
    fn generate(&self) -> Vec<(String, String)>;
}

impl<F> HeaderGenerator for F
where
    F: Fn() -> Vec<(String, String)> + Send + Sync,
{
    fn generate(&self) -> Vec<(String, String)> {
        self()
    }
}

/// Observes fetch errors (alerting, metrics). Returning `Err` aborts the job.
pub trait FetchErrorHandler: Send + Sync {
    fn handle(&self, url: &str, error: &ScrapeError) -> Result<(), ScrapeError>;
}

impl<F> FetchErrorHandler for F
where
    F: Fn(&str, &ScrapeError) -> Result<(), ScrapeError> + Send + Sync,
{
    fn handle(&self, url: &str, error: &ScrapeError) -> Result<(), ScrapeError> {
        self(url, error)
    }
}
