//! Fetch worker implementation
//!
//! This module handles everything that happens to one URL once it leaves the
//! frontier:
//! - Fetching through the transport with a per-attempt timeout
//! - Sleeping a fixed cooldown between failed attempts, up to an attempt cap
//! - Writing the body to the visited cache (retried the same way)
//! - Emitting a ledger record for the one write that published the entry
//! - Extracting and resolving links for the frontier

use crate::config::{CrawlerConfig, StorageConfig};
use crate::crawler::parser::{discover_links, is_gemtext};
use crate::crawler::wait_for_shutdown;
use crate::state::PageState;
use crate::storage::{
    LedgerHandle, LedgerRecord, SaveOutcome, StorageError, StorageResult, VisitedCache,
};
use crate::transport::{Transport, TransportError};
use crate::CrawlError;
use ::url::Url;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How many times to try an operation and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            cooldown,
        }
    }

    /// Policy for network fetches
    pub fn for_fetch(config: &CrawlerConfig) -> Self {
        Self::new(config.max_attempts, config.retry_cooldown())
    }

    /// Policy for cache writes
    pub fn for_cache_write(config: &StorageConfig) -> Self {
        Self::new(config.write_attempts, config.write_cooldown())
    }
}

/// Result of a fetch with retries
#[derive(Debug)]
pub enum FetchResult {
    /// The transport answered with a success status
    Success {
        body: Vec<u8>,
        /// Response meta, passed through unchanged
        content_type: String,
        attempts: u32,
    },

    /// Every attempt failed, or shutdown was requested between attempts
    Exhausted {
        attempts: u32,
        last_error: TransportError,
        interrupted: bool,
    },
}

/// Fetches a URL, retrying any transport failure after a fixed cooldown
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | Success (2x) | Return body and meta |
/// | Any other status | Retry after cooldown |
/// | Timeout, connect, TLS, I/O error | Retry after cooldown |
/// | Attempt cap reached | Give up |
/// | Shutdown requested during cooldown | Give up |
///
/// Never returns an error: callers branch on [`FetchResult`].
pub async fn fetch_url(
    transport: &dyn Transport,
    url: &Url,
    timeout: Duration,
    policy: RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> FetchResult {
    let mut attempts = 0;

    loop {
        attempts += 1;

        let result = match tokio::time::timeout(timeout, transport.fetch(url, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        let error = match result {
            Ok(response) => {
                return FetchResult::Success {
                    body: response.body,
                    content_type: response.meta,
                    attempts,
                }
            }
            Err(e) => e,
        };

        if attempts >= policy.max_attempts {
            return FetchResult::Exhausted {
                attempts,
                last_error: error,
                interrupted: false,
            };
        }

        tracing::debug!(
            "Attempt {}/{} for {} failed: {}; retrying in {:?}",
            attempts,
            policy.max_attempts,
            url,
            error,
            policy.cooldown
        );

        if cooldown(policy.cooldown, shutdown).await {
            return FetchResult::Exhausted {
                attempts,
                last_error: error,
                interrupted: true,
            };
        }
    }
}

/// Writes a body to the cache, retrying failed writes after a fixed cooldown
///
/// Each attempt runs on the blocking pool since it writes and syncs a file.
/// Returns the last error once the attempt cap is reached.
pub async fn save_with_retry(
    cache: &VisitedCache,
    url: &Url,
    body: Arc<[u8]>,
    policy: RetryPolicy,
) -> StorageResult<SaveOutcome> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        let (task_cache, task_url, task_body) = (cache.clone(), url.clone(), Arc::clone(&body));
        let result = tokio::task::spawn_blocking(move || task_cache.save(&task_url, &task_body))
            .await
            .unwrap_or_else(|e| Err(StorageError::Io(io::Error::other(e))));

        match result {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempts >= policy.max_attempts => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Cache write {}/{} for {} failed: {}",
                    attempts,
                    policy.max_attempts,
                    url,
                    e
                );
                tokio::time::sleep(policy.cooldown).await;
            }
        }
    }
}

/// Sleeps for `duration`; returns true if shutdown was requested first
async fn cooldown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = wait_for_shutdown(shutdown) => true,
    }
}

/// What happened to one dispatched URL
#[derive(Debug, Clone)]
pub struct PageReport {
    pub url: Url,
    /// `Fetched` or `Failed`
    pub state: PageState,
    /// True if this fetch published the cache entry and emitted the ledger record
    pub written: bool,
    pub attempts: u32,
    /// Resolved links that were not in the cache when checked
    pub discovered: Vec<Url>,
}

/// Shared, stateless processing pipeline run by every worker task
pub struct FetchWorker {
    transport: Arc<dyn Transport>,
    cache: VisitedCache,
    ledger: LedgerHandle,
    request_timeout: Duration,
    fetch_policy: RetryPolicy,
    write_policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl FetchWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: VisitedCache,
        ledger: LedgerHandle,
        crawler: &CrawlerConfig,
        storage: &StorageConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            cache,
            ledger,
            request_timeout: crawler.request_timeout(),
            fetch_policy: RetryPolicy::for_fetch(crawler),
            write_policy: RetryPolicy::for_cache_write(storage),
            shutdown,
        }
    }

    /// Fetches, caches, records and scans one URL
    ///
    /// Per-URL failures end up in the returned report. The only error is a
    /// ledger that stopped accepting records, which is fatal for the crawl.
    pub async fn process(&self, url: &Url) -> Result<PageReport, CrawlError> {
        tracing::info!("Fetching {}", url);

        let mut shutdown = self.shutdown.clone();
        let fetched = fetch_url(
            self.transport.as_ref(),
            url,
            self.request_timeout,
            self.fetch_policy,
            &mut shutdown,
        )
        .await;

        let (body, content_type, attempts) = match fetched {
            FetchResult::Success {
                body,
                content_type,
                attempts,
            } => (body, content_type, attempts),
            FetchResult::Exhausted {
                attempts,
                last_error,
                interrupted,
            } => {
                if interrupted {
                    tracing::warn!(
                        "Abandoning {} after {} attempts, shutdown requested: {}",
                        url,
                        attempts,
                        last_error
                    );
                } else {
                    tracing::warn!(
                        "Failed to retrieve {} after {} attempts: {}",
                        url,
                        attempts,
                        last_error
                    );
                }
                return Ok(PageReport {
                    url: url.clone(),
                    state: PageState::Failed,
                    written: false,
                    attempts,
                    discovered: Vec::new(),
                });
            }
        };

        let body: Arc<[u8]> = Arc::from(body);
        let mut state = PageState::Fetched;
        let mut written = false;

        match save_with_retry(&self.cache, url, Arc::clone(&body), self.write_policy).await {
            Ok(outcome) if outcome.written => {
                self.ledger
                    .record(LedgerRecord::new(url, &outcome.identity, &content_type))
                    .await?;
                written = true;
            }
            Ok(outcome) => {
                tracing::debug!("{} already cached as {}", url, outcome.identity);
            }
            Err(e) => {
                tracing::error!("Giving up on caching {}: {}", url, e);
                state = PageState::Failed;
            }
        }

        let discovered = if is_gemtext(&content_type) {
            let text = String::from_utf8_lossy(&body);
            discover_links(url, &text)
                .into_iter()
                .filter(|link| !self.cache.exists(link))
                .collect()
        } else {
            Vec::new()
        };

        tracing::debug!(
            "{} done ({}, {} bytes, {} new links)",
            url,
            content_type,
            body.len(),
            discovered.len()
        );

        Ok(PageReport {
            url: url.clone(),
            state,
            written,
            attempts,
            discovered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_ledger, spawn_ledger};
    use crate::transport::Response;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Fails the first `failures` calls, then serves `body`
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        meta: String,
        body: Vec<u8>,
    }

    impl FlakyTransport {
        fn new(failures: u32, meta: &str, body: &str) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                meta: meta.to_string(),
                body: body.as_bytes().to_vec(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for FlakyTransport {
        async fn fetch(&self, _url: &Url, _timeout: Duration) -> Result<Response, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(TransportError::Status {
                    status: 44,
                    meta: "slow down".to_string(),
                });
            }
            Ok(Response {
                status: 20,
                meta: self.meta.clone(),
                body: self.body.clone(),
            })
        }
    }

    /// Never answers within the timeout
    struct HangingTransport;

    #[async_trait::async_trait]
    impl Transport for HangingTransport {
        async fn fetch(&self, _url: &Url, _timeout: Duration) -> Result<Response, TransportError> {
            std::future::pending().await
        }
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn quiet_shutdown() -> watch::Receiver<bool> {
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let transport = FlakyTransport::new(0, "text/gemini", "# hi");
        let result = fetch_url(
            &transport,
            &url("gemini://h/"),
            Duration::from_secs(1),
            quick_policy(3),
            &mut quiet_shutdown(),
        )
        .await;

        match result {
            FetchResult::Success {
                body,
                content_type,
                attempts,
            } => {
                assert_eq!(body, b"# hi");
                assert_eq!(content_type, "text/gemini");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let transport = FlakyTransport::new(2, "text/gemini", "ok");
        let result = fetch_url(
            &transport,
            &url("gemini://h/"),
            Duration::from_secs(1),
            quick_policy(5),
            &mut quiet_shutdown(),
        )
        .await;

        assert!(matches!(result, FetchResult::Success { attempts: 3, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_cap() {
        let transport = FlakyTransport::new(u32::MAX, "", "");
        let result = fetch_url(
            &transport,
            &url("gemini://h/"),
            Duration::from_secs(1),
            quick_policy(4),
            &mut quiet_shutdown(),
        )
        .await;

        assert!(matches!(
            result,
            FetchResult::Exhausted {
                attempts: 4,
                interrupted: false,
                ..
            }
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_attempt_timeout_enforced() {
        let result = fetch_url(
            &HangingTransport,
            &url("gemini://h/"),
            Duration::from_millis(20),
            quick_policy(2),
            &mut quiet_shutdown(),
        )
        .await;

        match result {
            FetchResult::Exhausted { last_error, .. } => {
                assert!(matches!(last_error, TransportError::Timeout(_)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_cooldown() {
        let transport = FlakyTransport::new(u32::MAX, "", "");
        let (tx, mut rx) = watch::channel(false);
        let policy = RetryPolicy::new(100, Duration::from_secs(3600));

        let signal = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
            tx
        });

        let result = fetch_url(
            &transport,
            &url("gemini://h/"),
            Duration::from_secs(1),
            policy,
            &mut rx,
        )
        .await;
        let _tx = signal.await.unwrap();

        assert!(matches!(
            result,
            FetchResult::Exhausted {
                attempts: 1,
                interrupted: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_save_with_retry_gives_up() {
        let dir = TempDir::new().unwrap();
        let cache = VisitedCache::open(dir.path().join("db")).unwrap();
        std::fs::remove_dir(cache.root()).unwrap();

        let body: Arc<[u8]> = Arc::from(&b"x"[..]);
        let result = save_with_retry(&cache, &url("gemini://h/a.gmi"), body, quick_policy(3)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_process_recovers_from_transient_cache_failure() {
        let dir = TempDir::new().unwrap();
        let cache = VisitedCache::open(dir.path().join("db")).unwrap();
        let ledger_path = dir.path().join("save.db");
        let (ledger, writer) = spawn_ledger(&ledger_path, 8).unwrap();

        // cache directory is gone until a later write attempt
        std::fs::remove_dir(cache.root()).unwrap();
        let root = cache.root().to_path_buf();
        let restore = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::create_dir(&root).unwrap();
        });

        let mut storage = StorageConfig::default();
        storage.write_attempts = 100;
        storage.write_cooldown_ms = 10;
        let worker = FetchWorker::new(
            Arc::new(FlakyTransport::new(0, "text/gemini", "# back")),
            cache.clone(),
            ledger,
            &CrawlerConfig::default(),
            &storage,
            quiet_shutdown(),
        );

        let page = url("gemini://h/index.gmi");
        let report = worker.process(&page).await.unwrap();
        drop(worker);
        restore.await.unwrap();

        assert_eq!(report.state, PageState::Fetched);
        assert!(report.written);
        assert_eq!(std::fs::read(cache.location_for(&page)).unwrap(), b"# back");
        assert_eq!(writer.finish().await.unwrap(), 1);
        assert_eq!(read_ledger(&ledger_path).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_process_writes_cache_and_ledger() {
        let dir = TempDir::new().unwrap();
        let cache = VisitedCache::open(dir.path().join("db")).unwrap();
        let ledger_path = dir.path().join("save.db");
        let (ledger, writer) = spawn_ledger(&ledger_path, 8).unwrap();
        let transport = Arc::new(FlakyTransport::new(
            1,
            "text/gemini; lang=en",
            "=> next.gmi Next\n=> https://web.example/\n=> seen.gmi\n",
        ));

        let seen = url("gemini://h/seen.gmi");
        cache.save(&seen, b"old").unwrap();

        let mut crawler = CrawlerConfig::default();
        crawler.retry_cooldown_ms = 1;
        let worker = FetchWorker::new(
            transport,
            cache.clone(),
            ledger,
            &crawler,
            &StorageConfig::default(),
            quiet_shutdown(),
        );

        let page = url("gemini://h/index.gmi");
        let report = worker.process(&page).await.unwrap();
        drop(worker);

        assert_eq!(report.state, PageState::Fetched);
        assert!(report.written);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.discovered, vec![url("gemini://h/next.gmi")]);
        assert!(cache.exists(&page));

        assert_eq!(writer.finish().await.unwrap(), 1);
        let records = read_ledger(&ledger_path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "gemini://h/index.gmi");
        assert_eq!(records[0].content_type, "text/gemini; lang=en");
    }

    #[tokio::test]
    async fn test_process_already_cached_page_skips_ledger() {
        let dir = TempDir::new().unwrap();
        let cache = VisitedCache::open(dir.path().join("db")).unwrap();
        let (ledger, writer) = spawn_ledger(dir.path().join("save.db"), 8).unwrap();
        let page = url("gemini://h/index.gmi");
        cache.save(&page, b"cached").unwrap();

        let worker = FetchWorker::new(
            Arc::new(FlakyTransport::new(0, "text/gemini", "fresh")),
            cache.clone(),
            ledger,
            &CrawlerConfig::default(),
            &StorageConfig::default(),
            quiet_shutdown(),
        );
        let report = worker.process(&page).await.unwrap();
        drop(worker);

        assert_eq!(report.state, PageState::Fetched);
        assert!(!report.written);
        assert_eq!(writer.finish().await.unwrap(), 0);
        assert_eq!(std::fs::read(cache.location_for(&page)).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn test_process_non_gemtext_not_scanned() {
        let dir = TempDir::new().unwrap();
        let cache = VisitedCache::open(dir.path().join("db")).unwrap();
        let (ledger, _writer) = spawn_ledger(dir.path().join("save.db"), 8).unwrap();

        let worker = FetchWorker::new(
            Arc::new(FlakyTransport::new(0, "text/plain", "=> looks-like-a-link.gmi\n")),
            cache,
            ledger,
            &CrawlerConfig::default(),
            &StorageConfig::default(),
            quiet_shutdown(),
        );
        let report = worker.process(&url("gemini://h/notes.txt")).await.unwrap();

        assert!(report.written);
        assert!(report.discovered.is_empty());
    }

    #[tokio::test]
    async fn test_process_exhausted_fetch_is_failed() {
        let dir = TempDir::new().unwrap();
        let cache = VisitedCache::open(dir.path().join("db")).unwrap();
        let (ledger, writer) = spawn_ledger(dir.path().join("save.db"), 8).unwrap();

        let mut crawler = CrawlerConfig::default();
        crawler.max_attempts = 2;
        crawler.retry_cooldown_ms = 1;
        let worker = FetchWorker::new(
            Arc::new(FlakyTransport::new(u32::MAX, "", "")),
            cache.clone(),
            ledger,
            &crawler,
            &StorageConfig::default(),
            quiet_shutdown(),
        );
        let page = url("gemini://h/down.gmi");
        let report = worker.process(&page).await.unwrap();
        drop(worker);

        assert_eq!(report.state, PageState::Failed);
        assert_eq!(report.attempts, 2);
        assert!(!cache.exists(&page));
        assert_eq!(writer.finish().await.unwrap(), 0);
    }
}
