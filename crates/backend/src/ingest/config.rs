use std::str::FromStr;
use std::time::Duration;

use super::extract::{ExtractOptions, RenderMode};

/// Configuration for the subscription sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cap on message ids returned by the combined provider query
    pub max_results: u32,
    /// Concurrent full-message fetches within one sync
    pub fetch_concurrency: usize,
    /// Request-level timeout applied to every provider call
    pub provider_timeout: Duration,
    pub extract: ExtractOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_results: 100,
            fetch_concurrency: 8,
            provider_timeout: Duration::from_secs(30),
            extract: ExtractOptions::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let render_mode = match std::env::var("RENDER_MODE") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!("Ignoring RENDER_MODE: {}", e);
                RenderMode::default()
            }),
            Err(_) => RenderMode::default(),
        };

        Self {
            max_results: env_or("SYNC_MAX_RESULTS", defaults.max_results),
            fetch_concurrency: env_or("SYNC_FETCH_CONCURRENCY", defaults.fetch_concurrency),
            provider_timeout: Duration::from_secs(env_or(
                "PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout.as_secs(),
            )),
            extract: ExtractOptions {
                render_mode,
                wrap_width: env_or("HTML_WRAP_WIDTH", defaults.extract.wrap_width),
            },
        }
    }

    /// Fetch concurrency clamped to `1..=max_results`.
    pub fn effective_concurrency(&self) -> usize {
        let cap = usize::try_from(self.max_results).unwrap_or(usize::MAX).max(1);
        self.fetch_concurrency.clamp(1, cap)
    }
}

/// Configuration for sender discovery scans
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Messages scanned when the caller does not ask for a specific amount
    pub max_scan: u32,
    /// Only mail newer than this many days is scanned
    pub recency_days: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_scan: 50,
            recency_days: 7,
        }
    }
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_scan: env_or("DISCOVERY_MAX_SCAN", defaults.max_scan),
            recency_days: env_or("DISCOVERY_RECENCY_DAYS", defaults.recency_days),
        }
    }
}

/// Parse an environment variable, falling back to `default` when it is unset or malformed.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
