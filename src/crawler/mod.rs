//! Crawler module for page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - Fetching with bounded retry and fixed cooldown
//! - Gemtext link extraction and resolution
//! - Frontier management and the bounded worker pool
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
mod parser;
mod scheduler;

pub use coordinator::{run_crawl, Coordinator};
pub use fetcher::{fetch_url, save_with_retry, FetchResult, FetchWorker, PageReport, RetryPolicy};
pub use parser::{discover_links, extract_links, is_gemtext, CandidateLink, MAX_LINKS_PER_PAGE};
pub use scheduler::{ScheduledFetch, Scheduler};

use tokio::sync::watch;

/// Counters describing one crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Pages that ended `Fetched`
    pub fetched: usize,
    /// Pages that ended `Failed`
    pub failed: usize,
    /// Fetched pages this run published to the cache
    pub written: usize,
    /// Fetched pages whose cache entry already existed at save time
    pub already_cached: usize,
    /// New URLs added to the frontier from page links
    pub discovered: usize,
    /// Lines appended to the ledger this run
    pub ledger_records: u64,
    /// URLs left in the frontier when the run stopped
    pub abandoned: usize,
    /// True if the run stopped because shutdown was requested
    pub interrupted: bool,
}

/// Resolves once the shutdown flag is `true`
///
/// If every sender is dropped without signalling, no shutdown can come and
/// this never resolves.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
