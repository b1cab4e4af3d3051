//! Date strip configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripConfig {
    /// Upstream fare-search endpoint.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Background prefetch parameters.
    #[serde(default)]
    pub prefetch: PrefetchConfig,

    /// Whole-response cache shared with the main search.
    #[serde(default)]
    pub response_cache: ResponseCacheConfig,
}

/// Fare-search API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Max search calls per second across the whole process.
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: u32,

    /// HTTP client timeout (milliseconds).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Window and scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Dates per axis window, centered on the committed date.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Max fetches in flight per chunk.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay between chunks (milliseconds).
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Per-key fetch timeout (milliseconds), independent of cancellation.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl PrefetchConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    /// Max age of a cached search response (seconds).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "http://localhost:8080/api".into()
}
fn default_requests_per_sec() -> u32 {
    5
}
fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_window_size() -> usize {
    7
}
fn default_concurrency() -> usize {
    2
}
fn default_pacing_ms() -> u64 {
    500
}
fn default_fetch_timeout_ms() -> u64 {
    8_000
}

fn default_ttl_secs() -> u64 {
    600
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            requests_per_sec: default_requests_per_sec(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            concurrency: default_concurrency(),
            pacing_ms: default_pacing_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            prefetch: PrefetchConfig::default(),
            response_cache: ResponseCacheConfig::default(),
        }
    }
}
