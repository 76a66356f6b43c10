use std::sync::atomic::{AtomicU64, Ordering};

use trawl_core::traits::HeaderGenerator;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "en-US,en;q=0.7,de;q=0.3",
    "en;q=0.8,fr;q=0.5",
];

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// [`HeaderGenerator`] that picks a browser-like header set at random.
#[derive(Debug)]
pub struct RotatingHeaderGenerator {
    user_agents: Vec<String>,
    state: AtomicU64,
}

impl RotatingHeaderGenerator {
    /// Seeded from the clock.
    pub fn new() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self::with_seed(seed)
    }

    /// Deterministic sequence for a given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            user_agents: USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            // xorshift never leaves zero
            state: AtomicU64::new(seed | 1),
        }
    }

    /// Replace the built-in User-Agent pool. An empty pool is ignored.
    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        if !user_agents.is_empty() {
            self.user_agents = user_agents;
        }
        self
    }

    fn next(&self) -> u64 {
        let mut x = self.state.load(Ordering::Relaxed);
        // xorshift64
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::Relaxed);
        x
    }

    fn pick<'a, T: AsRef<str>>(&self, pool: &'a [T]) -> &'a str {
        pool[(self.next() % pool.len() as u64) as usize].as_ref()
    }
}

impl Default for RotatingHeaderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderGenerator for RotatingHeaderGenerator {
    fn generate(&self) -> Vec<(String, String)> {
        vec![
            ("User-Agent".into(), self.pick(&self.user_agents).to_string()),
            ("Accept".into(), ACCEPT.into()),
            (
                "Accept-Language".into(),
                self.pick(ACCEPT_LANGUAGES).to_string(),
            ),
            ("Upgrade-Insecure-Requests".into(), "1".into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_headers_come_from_pool() {
        let generator = RotatingHeaderGenerator::with_seed(42);
        let headers = generator.generate();
        assert_eq!(headers[0].0, "User-Agent");
        assert!(USER_AGENTS.contains(&headers[0].1.as_str()));
        assert!(ACCEPT_LANGUAGES.contains(&headers[2].1.as_str()));
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let a = RotatingHeaderGenerator::with_seed(7);
        let b = RotatingHeaderGenerator::with_seed(7);
        for _ in 0..5 {
            assert_eq!(a.generate(), b.generate());
        }
    }

    #[test]
    fn test_user_agents_rotate() {
        let generator = RotatingHeaderGenerator::with_seed(1234);
        let seen: HashSet<String> = (0..50).map(|_| generator.generate()[0].1.clone()).collect();
        assert!(seen.len() > 1);
    }

    #[test]
    fn test_custom_pool() {
        let generator =
            RotatingHeaderGenerator::with_seed(3).with_user_agents(vec!["only-agent".into()]);
        assert_eq!(generator.generate()[0].1, "only-agent");
    }

    #[test]
    fn test_zero_seed_still_advances() {
        let generator = RotatingHeaderGenerator::with_seed(0);
        assert_ne!(generator.next(), 0);
    }
}
