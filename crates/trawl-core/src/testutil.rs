//! Test utilities: mock implementations of the collaborator traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` (or atomics) for interior mutability,
//! allowing test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ScrapeError;
use crate::models::{HttpRequest, HttpResponse};
use crate::reporter::{ScrapeEvent, ScrapeReporter};
use crate::traits::{
    FetchErrorHandler, FetchSession, Fetcher, PostProcessArgs, PostProcessor,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Canned answer of a [`MockFetcher`].
#[derive(Debug, Clone)]
pub struct MockRoute {
    outcome: Result<(u16, String), ScrapeError>,
    delay: Option<Duration>,
}

impl MockRoute {
    pub fn ok(body: &str) -> Self {
        Self {
            outcome: Ok((200, body.to_string())),
            delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            outcome: Ok((status, String::new())),
            delay: None,
        }
    }

    pub fn error(error: ScrapeError) -> Self {
        Self {
            outcome: Err(error),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Mock fetcher answering from per-URL route queues.
///
/// Each URL has a queue of routes: every call pops the front route until
/// one is left, which then answers all further calls. URLs without routes
/// get the default route.
#[derive(Clone)]
pub struct MockFetcher {
    default: MockRoute,
    default_delay: Option<Duration>,
    routes: Arc<Mutex<HashMap<String, VecDeque<MockRoute>>>>,
    sent: Arc<Mutex<Vec<HttpRequest>>>,
    sessions_opened: Arc<AtomicUsize>,
    open_sessions: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockFetcher {
    fn with_default(default: MockRoute) -> Self {
        Self {
            default,
            default_delay: None,
            routes: Arc::new(Mutex::new(HashMap::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            sessions_opened: Arc::new(AtomicUsize::new(0)),
            open_sessions: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every URL answers 200 with `body`.
    pub fn ok(body: &str) -> Self {
        Self::with_default(MockRoute::ok(body))
    }

    /// Every URL answers with `status` and an empty body.
    pub fn status(status: u16) -> Self {
        Self::with_default(MockRoute::status(status))
    }

    /// Every URL fails with `error`.
    pub fn failing(error: ScrapeError) -> Self {
        Self::with_default(MockRoute::error(error))
    }

    /// Queue `route` for `url`.
    pub fn route(self, url: &str, route: MockRoute) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(route);
        self
    }

    /// Delay applied to routes that have no delay of their own.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_route(&self, url: &str) -> MockRoute {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| self.default.clone()),
            None => self.default.clone(),
        }
    }
}

impl Fetcher for MockFetcher {
    type Session = MockSession;

    fn open_session(&self) -> Result<MockSession, ScrapeError> {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            fetcher: self.clone(),
        })
    }
}

/// Session handed out by [`MockFetcher`]; counts itself closed on drop.
pub struct MockSession {
    fetcher: MockFetcher,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.fetcher.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FetchSession for MockSession {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ScrapeError> {
        let fetcher = &self.fetcher;
        fetcher.sent.lock().unwrap().push(request.clone());
        let route = fetcher.next_route(&request.url);

        let current = fetcher.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        fetcher.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&fetcher.in_flight));

        if let Some(delay) = route.delay.or(fetcher.default_delay) {
            tokio::time::sleep(delay).await;
        }

        route
            .outcome
            .map(|(status, body)| HttpResponse::new(status, request.url.clone(), body))
    }
}

// ---------------------------------------------------------------------------
// MockPostProcessor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum PostProcessMode {
    Fixed(String),
    Fail(ScrapeError),
}

/// Mock post-processor producing `String` results.
#[derive(Clone)]
pub struct MockPostProcessor {
    mode: PostProcessMode,
    seen_html: Arc<Mutex<Vec<String>>>,
    seen_kwargs: Arc<Mutex<Vec<PostProcessArgs>>>,
}

impl MockPostProcessor {
    fn with_mode(mode: PostProcessMode) -> Self {
        Self {
            mode,
            seen_html: Arc::new(Mutex::new(Vec::new())),
            seen_kwargs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always returns `value`.
    pub fn returning(value: &str) -> Self {
        Self::with_mode(PostProcessMode::Fixed(value.to_string()))
    }

    /// Always fails with `error`.
    pub fn failing(error: ScrapeError) -> Self {
        Self::with_mode(PostProcessMode::Fail(error))
    }

    pub fn seen_html(&self) -> Vec<String> {
        self.seen_html.lock().unwrap().clone()
    }

    pub fn seen_kwargs(&self) -> Vec<PostProcessArgs> {
        self.seen_kwargs.lock().unwrap().clone()
    }
}

impl PostProcessor for MockPostProcessor {
    type Output = String;

    fn process(
        &self,
        html: &str,
        _response: &HttpResponse,
        kwargs: &PostProcessArgs,
    ) -> Result<String, ScrapeError> {
        self.seen_html.lock().unwrap().push(html.to_string());
        self.seen_kwargs.lock().unwrap().push(kwargs.clone());
        match &self.mode {
            PostProcessMode::Fixed(value) => Ok(value.clone()),
            PostProcessMode::Fail(error) => Err(error.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingErrorHandler
// ---------------------------------------------------------------------------

/// Error handler that records `(url, error)` pairs.
#[derive(Clone, Default)]
pub struct RecordingErrorHandler {
    calls: Arc<Mutex<Vec<(String, ScrapeError)>>>,
    fail_with: Option<ScrapeError>,
}

impl RecordingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the call, then returns `error`.
    pub fn failing(error: ScrapeError) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: Some(error),
        }
    }

    pub fn calls(&self) -> Vec<(String, ScrapeError)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FetchErrorHandler for RecordingErrorHandler {
    fn handle(&self, url: &str, error: &ScrapeError) -> Result<(), ScrapeError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), error.clone()));
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that keeps every event.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<ScrapeEvent>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScrapeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ScrapeEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl ScrapeReporter for MockReporter {
    fn report(&self, event: ScrapeEvent) {
        self.events.lock().unwrap().push(event);
    }
}
