use std::fmt;

use thiserror::Error;

/// Error types for trawl scrape jobs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    /// The server closed the connection before a response was read.
    #[error("Server disconnected: {0}")]
    Disconnected(String),

    /// Connection could not be established (DNS, refused, reset, TLS).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The server answered with anything other than HTTP 200.
    #[error("url responded with a http status of {0}")]
    HttpStatus(u16),

    /// The post-processing transform rejected the response.
    #[error("Post-processing failed: {0}")]
    PostProcess(String),

    /// No outbound proxy could be resolved for the URL.
    #[error("Proxy resolution failed: {0}")]
    Proxy(String),

    /// Caller supplied unusable input (empty URL list, unknown method, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine or collaborator configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request was still in flight when its job was aborted.
    #[error("Request cancelled before completion")]
    Cancelled,

    /// Anything else. An empty message marks a programming error.
    #[error("{0}")]
    Unexpected(String),
}

/// Discriminant of a [`ScrapeError`], used for circuit-breaker comparisons
/// and the acceptable-error set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Disconnected,
    Connection,
    Timeout,
    HttpStatus,
    PostProcess,
    Proxy,
    InvalidInput,
    Config,
    Cancelled,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Disconnected => "disconnected",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::PostProcess => "post_process",
            ErrorKind::Proxy => "proxy",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    /// The kinds a scrape tolerates by default: transient network failures
    /// and non-200 responses.
    pub fn default_acceptable() -> [ErrorKind; 4] {
        [
            ErrorKind::Disconnected,
            ErrorKind::Connection,
            ErrorKind::Timeout,
            ErrorKind::HttpStatus,
        ]
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::Disconnected(_) => ErrorKind::Disconnected,
            ScrapeError::Connection(_) => ErrorKind::Connection,
            ScrapeError::Timeout(_) => ErrorKind::Timeout,
            ScrapeError::HttpStatus(_) => ErrorKind::HttpStatus,
            ScrapeError::PostProcess(_) => ErrorKind::PostProcess,
            ScrapeError::Proxy(_) => ErrorKind::Proxy,
            ScrapeError::InvalidInput(_) => ErrorKind::InvalidInput,
            ScrapeError::Config(_) => ErrorKind::Config,
            ScrapeError::Cancelled => ErrorKind::Cancelled,
            ScrapeError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Returns true for disconnects, connection failures and timeouts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::Disconnected(_) | ScrapeError::Connection(_) | ScrapeError::Timeout(_)
        )
    }

    /// The error's own description, without the variant prefix.
    ///
    /// An unexpected error whose description is empty is re-raised by the
    /// fetch unit instead of being stored on the result.
    pub fn description(&self) -> String {
        match self {
            ScrapeError::Disconnected(msg)
            | ScrapeError::Connection(msg)
            | ScrapeError::PostProcess(msg)
            | ScrapeError::Proxy(msg)
            | ScrapeError::InvalidInput(msg)
            | ScrapeError::Config(msg)
            | ScrapeError::Unexpected(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ScrapeError::Disconnected("eof".into()).is_transient());
        assert!(ScrapeError::Connection("refused".into()).is_transient());
        assert!(ScrapeError::Timeout(30).is_transient());
        assert!(!ScrapeError::HttpStatus(503).is_transient());
        assert!(!ScrapeError::PostProcess("bad html".into()).is_transient());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ScrapeError::HttpStatus(404).kind(), ErrorKind::HttpStatus);
        assert_eq!(ScrapeError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(ScrapeError::Unexpected("x".into()).kind(), ErrorKind::Unexpected);
        assert_eq!(ErrorKind::HttpStatus.to_string(), "http_status");
    }

    #[test]
    fn test_http_status_message() {
        assert_eq!(
            ScrapeError::HttpStatus(429).to_string(),
            "url responded with a http status of 429"
        );
    }

    #[test]
    fn test_description_strips_prefix() {
        assert_eq!(ScrapeError::Connection("reset".into()).description(), "reset");
        assert_eq!(ScrapeError::Unexpected(String::new()).description(), "");
        assert!(!ScrapeError::Timeout(5).description().is_empty());
    }

    #[test]
    fn test_default_acceptable_kinds() {
        let kinds = ErrorKind::default_acceptable();
        assert!(kinds.contains(&ErrorKind::Timeout));
        assert!(kinds.contains(&ErrorKind::HttpStatus));
        assert!(!kinds.contains(&ErrorKind::Unexpected));
        assert!(!kinds.contains(&ErrorKind::PostProcess));
    }
}
