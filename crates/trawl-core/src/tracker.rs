//! Per-request attempt bookkeeping.

use std::collections::{HashMap, HashSet};

use crate::request::Request;

/// Attempt state of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerEntry {
    pub scraped: bool,
    pub attempts: u32,
}

/// Source of truth for whether a request may be dispatched again.
///
/// Entries are never removed, so the failure report stays complete even for
/// requests abandoned mid-job.
#[derive(Debug, Clone)]
pub struct Tracker {
    attempt_limit: u32,
    entries: HashMap<Request, TrackerEntry>,
}

impl Tracker {
    pub fn new(attempt_limit: u32) -> Self {
        Self {
            attempt_limit,
            entries: HashMap::new(),
        }
    }

    pub fn attempt_limit(&self) -> u32 {
        self.attempt_limit
    }

    /// Create a zero-state entry for each request not yet tracked.
    pub fn register<'a>(&mut self, requests: impl IntoIterator<Item = &'a Request>) {
        for request in requests {
            self.entries.entry(request.clone()).or_default();
        }
    }

    /// Record one attempt for each request.
    pub fn record<'a>(&mut self, success: bool, requests: impl IntoIterator<Item = &'a Request>) {
        for request in requests {
            let entry = self.entries.entry(request.clone()).or_default();
            entry.scraped = success;
            entry.attempts = entry.attempts.saturating_add(1);
        }
    }

    pub fn entry(&self, request: &Request) -> Option<&TrackerEntry> {
        self.entries.get(request)
    }

    /// Whether `request` has used up its attempts.
    pub fn is_exhausted(&self, request: &Request) -> bool {
        let attempts = self.entries.get(request).map_or(0, |e| e.attempts);
        attempts >= self.attempt_limit
    }

    /// All tracked requests that reached the attempt limit.
    pub fn failed_requests(&self) -> HashSet<Request> {
        self.entries
            .iter()
            .filter(|(_, e)| e.attempts >= self.attempt_limit)
            .map(|(r, _)| r.clone())
            .collect()
    }

    /// Requests that ran out of attempts without ever succeeding.
    pub fn abandoned_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !e.scraped && e.attempts >= self.attempt_limit)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
