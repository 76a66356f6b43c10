use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ScrapeError;
use crate::request::{Request, RequestKind};
use crate::tracker::Tracker;

/// Everything a [`FetchSession`](crate::traits::FetchSession) needs to issue
/// one HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: RequestKind,
    pub url: String,
    /// JSON body; only ever set for POST requests.
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    pub proxy: Option<String>,
}

/// Response shape shared by every fetcher backend.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of one fetch attempt.
///
/// Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult<T> {
    pub request: Request,
    pub result: Option<T>,
    pub status: Option<u16>,
    pub error: Option<ScrapeError>,
}

impl<T> FetchResult<T> {
    pub fn success(request: Request, result: T, status: u16) -> Self {
        Self {
            request,
            result: Some(result),
            status: Some(status),
            error: None,
        }
    }

    pub fn failure(request: Request, status: Option<u16>, error: ScrapeError) -> Self {
        Self {
            request,
            result: None,
            status,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Caller-facing record returned by the scrape entry points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeOutcome<T> {
    pub url: String,
    pub req: Request,
    pub result: Option<T>,
    pub status: Option<u16>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ScrapeError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<ScrapeError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl<T> From<FetchResult<T>> for ScrapeOutcome<T> {
    fn from(fetched: FetchResult<T>) -> Self {
        Self {
            url: fetched.request.url.clone(),
            req: fetched.request,
            result: fetched.result,
            status: fetched.status,
            error: fetched.error,
        }
    }
}

/// Results accumulated across rounds, keyed by request.
///
/// Iteration follows first insertion; a later round's result for the same
/// request replaces the earlier one in place.
#[derive(Debug, Clone)]
pub struct ResultSet<T> {
    index: HashMap<Request, usize>,
    entries: Vec<FetchResult<T>>,
}

impl<T> Default for ResultSet<T> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<T> ResultSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fetched: FetchResult<T>) {
        match self.index.get(&fetched.request) {
            Some(&pos) => self.entries[pos] = fetched,
            None => {
                self.index.insert(fetched.request.clone(), self.entries.len());
                self.entries.push(fetched);
            }
        }
    }

    pub fn contains(&self, request: &Request) -> bool {
        self.index.contains_key(request)
    }

    pub fn get(&self, request: &Request) -> Option<&FetchResult<T>> {
        self.index.get(request).map(|&pos| &self.entries[pos])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_outcomes(self) -> Vec<ScrapeOutcome<T>> {
        self.entries.into_iter().map(ScrapeOutcome::from).collect()
    }
}

/// Full record of one scrape job.
#[derive(Debug)]
pub struct JobReport<T> {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rounds: u32,
    pub results: Vec<ScrapeOutcome<T>>,
    pub tracker: Tracker,
}

impl<T> JobReport<T> {
    pub fn runtime(&self) -> chrono::TimeDelta {
        self.finished_at - self.started_at
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}
