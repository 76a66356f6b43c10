use std::sync::OnceLock;

use trawl_core::error::ScrapeError;
use trawl_core::traits::ProxyResolver;
use url::Url;

/// Proxy settings per URL scheme plus the hosts that bypass them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyTable {
    pub http: Option<String>,
    pub https: Option<String>,
    /// Host suffixes that are fetched directly; `*` bypasses everything.
    pub no_proxy: Vec<String>,
}

impl ProxyTable {
    /// Read `HTTP_PROXY`, `HTTPS_PROXY`, `ALL_PROXY` and `NO_PROXY`
    /// (upper or lower case).
    pub fn from_env() -> Self {
        let all = env_var("ALL_PROXY");
        Self {
            http: env_var("HTTP_PROXY").or_else(|| all.clone()),
            https: env_var("HTTPS_PROXY").or(all),
            no_proxy: env_var("NO_PROXY")
                .map(|list| parse_no_proxy(&list))
                .unwrap_or_default(),
        }
    }

    fn bypasses(&self, host: &str) -> bool {
        self.no_proxy.iter().any(|entry| {
            entry == "*"
                || host == entry
                || host
                    .strip_suffix(entry.as_str())
                    .is_some_and(|rest| rest.ends_with('.') || entry.starts_with('.'))
        })
    }

    fn lookup(&self, url: &str) -> Result<Option<String>, ScrapeError> {
        let parsed = Url::parse(url)
            .map_err(|e| ScrapeError::Proxy(format!("cannot resolve proxy for {url}: {e}")))?;
        if parsed.host_str().is_some_and(|host| self.bypasses(host)) {
            return Ok(None);
        }
        Ok(match parsed.scheme() {
            "https" => self.https.clone(),
            "http" => self.http.clone(),
            _ => None,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .or_else(|_| std::env::var(name.to_lowercase()))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_no_proxy(list: &str) -> Vec<String> {
    list.split(',')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// [`ProxyResolver`] backed by the standard proxy environment variables.
///
/// The environment is read on the first lookup and cached for the lifetime
/// of the resolver, so each engine owns its own table.
#[derive(Debug, Default)]
pub struct EnvProxyResolver {
    table: OnceLock<ProxyTable>,
}

impl EnvProxyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver over a fixed table; the environment is never read.
    pub fn with_table(table: ProxyTable) -> Self {
        Self {
            table: OnceLock::from(table),
        }
    }

    fn table(&self) -> &ProxyTable {
        self.table.get_or_init(|| {
            let table = ProxyTable::from_env();
            tracing::debug!(
                http = ?table.http,
                https = ?table.https,
                no_proxy = table.no_proxy.len(),
                "Loaded proxy settings from environment"
            );
            table
        })
    }
}

impl ProxyResolver for EnvProxyResolver {
    fn resolve(&self, url: &str) -> Result<Option<String>, ScrapeError> {
        self.table().lookup(url)
    }
}
