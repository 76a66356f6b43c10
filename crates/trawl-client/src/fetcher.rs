use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Client, Method};
use trawl_core::error::ScrapeError;
use trawl_core::models::{HttpRequest, HttpResponse};
use trawl_core::request::RequestKind;
use trawl_core::traits::{FetchSession, Fetcher};
use url::Url;

const DEFAULT_USER_AGENT: &str = "Trawl/0.1 (Batch Scraper)";

/// HTTP fetcher using reqwest.
///
/// Every batch gets its own [`ReqwestSession`]; the session builds one
/// client per distinct proxy and drops them, with their connection pools,
/// when the batch ends.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    timeout: Duration,
    user_agent: String,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// User-Agent sent when a request carries no `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for ReqwestFetcher {
    type Session = ReqwestSession;

    fn open_session(&self) -> Result<ReqwestSession, ScrapeError> {
        Ok(ReqwestSession {
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            clients: Mutex::new(HashMap::new()),
        })
    }
}

/// Batch-scoped reqwest session.
pub struct ReqwestSession {
    timeout: Duration,
    user_agent: String,
    /// One client per proxy; `None` is the direct client.
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestSession {
    fn client_for(&self, proxy: Option<&str>) -> Result<Client, ScrapeError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| ScrapeError::Unexpected("client cache lock poisoned".into()))?;
        if let Some(client) = clients.get(&proxy.map(str::to_string)) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ScrapeError::Proxy(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        } else {
            // Only the engine decides on proxies; ignore HTTP_PROXY and friends.
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| ScrapeError::Config(format!("failed to build http client: {e}")))?;

        tracing::debug!(proxy = ?proxy, "Built http client for session");
        clients.insert(proxy.map(str::to_string), client.clone());
        Ok(client)
    }

    fn classify(&self, error: reqwest::Error) -> ScrapeError {
        if error.is_timeout() {
            ScrapeError::Timeout(self.timeout.as_secs())
        } else if error.is_connect() {
            ScrapeError::Connection(format!("Connection failed: {error}"))
        } else if error.is_request() || error.is_body() {
            ScrapeError::Disconnected(error.to_string())
        } else {
            ScrapeError::Unexpected(error.to_string())
        }
    }
}

impl FetchSession for ReqwestSession {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ScrapeError> {
        let url = validate_url(&request.url)?;
        let client = self.client_for(request.proxy.as_deref())?;

        let method = match request.method {
            RequestKind::Get => Method::GET,
            RequestKind::Post => Method::POST,
        };
        let mut builder = client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::Disconnected(format!("Failed to read response body: {e}")))?;

        tracing::debug!(url = %request.url, status, bytes = body.len(), "Fetched");
        Ok(HttpResponse {
            status,
            url: final_url,
            headers,
            body,
        })
    }
}

/// Only absolute `http` and `https` URLs are fetched.
fn validate_url(url: &str) -> Result<Url, ScrapeError> {
    let parsed =
        Url::parse(url).map_err(|e| ScrapeError::InvalidInput(format!("Invalid URL {url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ScrapeError::InvalidInput(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Serve one canned response and hand back the raw request head.
    async fn serve_once(response: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        (format!("http://{addr}"), rx)
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: RequestKind::Get,
            url: url.to_string(),
            body: None,
            headers: vec![("X-Trace".into(), "abc".into())],
            proxy: None,
        }
    }

    #[test]
    fn test_validate_url_rejects_bad_scheme() {
        let err = validate_url("file:///etc/passwd").unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn test_validate_url_rejects_relative() {
        assert!(matches!(
            validate_url("/relative/path"),
            Err(ScrapeError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_send_returns_status_and_body() {
        let (base, head) = serve_once(
            "HTTP/1.1 404 Not Found\r\ncontent-type: text/html\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope",
        )
        .await;
        let session = ReqwestFetcher::new().open_session().unwrap();

        let response = session.send(&get(&format!("{base}/missing"))).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.text(), "nope");
        assert_eq!(response.header("Content-Type"), Some("text/html"));
        let head = head.await.unwrap().to_lowercase();
        assert!(head.starts_with("get /missing http/1.1"));
        assert!(head.contains("x-trace: abc"));
        assert!(head.contains("user-agent: trawl/0.1"));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let (base, head) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
        )
        .await;
        let session = ReqwestFetcher::new().open_session().unwrap();
        let request = HttpRequest {
            method: RequestKind::Post,
            body: Some(serde_json::json!({"page": 1})),
            ..get(&format!("{base}/submit"))
        };

        let response = session.send(&request).await.unwrap();

        assert_eq!(response.status, 200);
        let head = head.await.unwrap().to_lowercase();
        assert!(head.starts_with("post /submit http/1.1"));
        assert!(head.contains("content-type: application/json"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let session = ReqwestFetcher::new().open_session().unwrap();

        let err = session.send(&get(&format!("http://{addr}/"))).await.unwrap_err();

        assert!(matches!(err, ScrapeError::Connection(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_env_proxy_is_ignored_without_explicit_proxy() {
        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap();
        // SAFETY: nothing else in this crate's tests reads HTTP_PROXY.
        unsafe { std::env::set_var("HTTP_PROXY", format!("http://{proxy_addr}")) };
        let session = ReqwestFetcher::with_timeout(Duration::from_secs(2))
            .open_session()
            .unwrap();

        let result = session.send(&get("http://target.example.invalid/page")).await;
        unsafe { std::env::remove_var("HTTP_PROXY") };

        assert!(result.is_err(), "got {result:?}");
        let accepted = tokio::time::timeout(Duration::from_millis(200), proxy.accept()).await;
        assert!(accepted.is_err(), "request was sent through HTTP_PROXY");
    }

    #[test]
    fn test_clients_are_cached_per_proxy() {
        let session = ReqwestFetcher::new().open_session().unwrap();
        session.client_for(None).unwrap();
        session.client_for(None).unwrap();
        session.client_for(Some("http://proxy.local:3128")).unwrap();
        assert_eq!(session.clients.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_proxy_is_proxy_error() {
        let session = ReqwestFetcher::new().open_session().unwrap();
        let err = session.client_for(Some("not a proxy")).unwrap_err();
        assert!(matches!(err, ScrapeError::Proxy(_)));
    }
}
