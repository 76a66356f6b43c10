pub mod circuit_breaker;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod models;
pub mod rate_limit;
pub mod reporter;
pub mod request;
pub mod tracker;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::ScrapeConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{ErrorKind, ScrapeError};
pub use models::{FetchResult, HttpRequest, HttpResponse, JobReport, ScrapeOutcome};
pub use reporter::{ScrapeEvent, ScrapeReporter, TracingScrapeReporter};
pub use request::{Payload, Request, RequestKind};
pub use tracker::{Tracker, TrackerEntry};
pub use traits::{
    FetchErrorHandler, FetchSession, Fetcher, HeaderGenerator, PostProcessArgs, PostProcessor,
    ProxyResolver,
};
