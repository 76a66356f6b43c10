//! Request keys and the deduplicating request-set builder.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// HTTP method of a scrape job. Only GET and POST are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestKind {
    #[default]
    Get,
    Post,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Get => "GET",
            RequestKind::Post => "POST",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(RequestKind::Get),
            "POST" => Ok(RequestKind::Post),
            _ => Err(ScrapeError::InvalidInput(format!(
                "request kind must be GET or POST, got '{s}'"
            ))),
        }
    }
}

/// Request body: a JSON object whose entries are kept sorted by key so that
/// two payloads with the same entries compare and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, serde_json::Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone().into_iter().collect())
    }
}

impl Hash for Payload {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.0.len());
        for (key, value) in &self.0 {
            key.hash(state);
            // serde_json::Value has no Hash impl; its compact rendering is
            // canonical because nested objects are BTreeMaps too.
            value.to_string().hash(state);
        }
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Payload {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl FromIterator<(String, serde_json::Value)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl TryFrom<serde_json::Value> for Payload {
    type Error = ScrapeError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Object(map) => Ok(map.into()),
            other => Err(ScrapeError::InvalidInput(format!(
                "payload must be a JSON object, got {other}"
            ))),
        }
    }
}

/// One unit of scrape work: a URL plus an optional payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    pub payload: Option<Payload>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            payload: None,
        }
    }

    pub fn with_payload(url: impl Into<String>, payload: Payload) -> Self {
        Self {
            url: url.into(),
            payload: Some(payload),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(payload) => write!(f, "{} {}", self.url, payload.to_json()),
            None => f.write_str(&self.url),
        }
    }
}

/// Deduplicated, order-preserving set of requests built from caller input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestSet {
    requests: Vec<Request>,
}

impl RequestSet {
    /// Pair `urls` with `payloads` and collapse duplicates.
    ///
    /// `payloads` is truncated or padded with "no payload" to the length of
    /// `urls`. The first occurrence of a duplicate keeps its position.
    pub fn build(urls: &[String], payloads: Option<&[Option<Payload>]>) -> Result<Self, ScrapeError> {
        if urls.is_empty() {
            return Err(ScrapeError::InvalidInput("no urls to scrape".into()));
        }

        let payloads = payloads.unwrap_or(&[]);
        let mut seen = HashSet::with_capacity(urls.len());
        let mut requests = Vec::with_capacity(urls.len());

        for (i, url) in urls.iter().enumerate() {
            let request = Request {
                url: url.clone(),
                payload: payloads.get(i).cloned().flatten(),
            };
            if seen.insert(request.clone()) {
                requests.push(request);
            }
        }

        Ok(Self { requests })
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Request> {
        self.requests.iter()
    }

    pub fn into_vec(self) -> Vec<Request> {
        self.requests
    }
}

impl IntoIterator for RequestSet {
    type Item = Request;
    type IntoIter = std::vec::IntoIter<Request>;

    fn into_iter(self) -> Self::IntoIter {
        self.requests.into_iter()
    }
}
