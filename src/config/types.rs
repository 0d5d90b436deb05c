use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Gemini-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Absolute gemini URLs the crawl starts from, in order
    pub seeds: Vec<String>,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Builds a configuration with default settings around the given seeds
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            crawler: CrawlerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of fetch workers in flight at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Budget for a single fetch attempt (milliseconds)
    #[serde(rename = "request-timeout-ms", default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Fetch attempts per URL before it is marked failed
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep between failed fetch attempts (milliseconds)
    #[serde(rename = "retry-cooldown-ms", default = "default_retry_cooldown_ms")]
    pub retry_cooldown_ms: u64,
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_cooldown_ms: default_retry_cooldown_ms(),
        }
    }
}

/// Where crawl output goes
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one file per cached page
    #[serde(rename = "cache-dir", default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Append-only ledger of fetched pages
    #[serde(rename = "ledger-path", default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Attempts to write one cache entry before giving up on it
    #[serde(rename = "write-attempts", default = "default_write_attempts")]
    pub write_attempts: u32,

    /// Sleep between failed cache writes (milliseconds)
    #[serde(rename = "write-cooldown-ms", default = "default_write_cooldown_ms")]
    pub write_cooldown_ms: u64,
}

impl StorageConfig {
    pub fn write_cooldown(&self) -> Duration {
        Duration::from_millis(self.write_cooldown_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            ledger_path: default_ledger_path(),
            write_attempts: default_write_attempts(),
            write_cooldown_ms: default_write_cooldown_ms(),
        }
    }
}

fn default_workers() -> usize {
    16
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    10
}

// Servers on the network throttle aggressively; back off for minutes, not seconds
fn default_retry_cooldown_ms() -> u64 {
    120_000
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("db")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("save.db")
}

fn default_write_attempts() -> u32 {
    5
}

fn default_write_cooldown_ms() -> u64 {
    1_000
}
