//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the main crawl loop that coordinates all aspects of
//! the crawling process, including:
//! - Opening the visited cache and the ledger writer
//! - Seeding the frontier with URLs not already cached
//! - Dispatching URLs to a bounded pool of worker tasks
//! - Feeding discovered links back into the frontier
//! - Cooperative shutdown and final ledger flush

use crate::config::Config;
use crate::crawler::fetcher::{FetchWorker, PageReport};
use crate::crawler::scheduler::{ScheduledFetch, Scheduler};
use crate::crawler::{wait_for_shutdown, CrawlSummary};
use crate::state::PageState;
use crate::storage::{count_records, spawn_ledger, LedgerWriter, VisitedCache};
use crate::transport::Transport;
use crate::url::parse_seed;
use crate::CrawlError;
use ::url::Url;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// How many records the ledger channel buffers before workers wait on it
const LEDGER_BUFFER: usize = 256;

/// Main crawler coordinator structure
pub struct Coordinator {
    scheduler: Scheduler,
    worker: Arc<FetchWorker>,
    cache: VisitedCache,
    ledger: LedgerWriter,
    shutdown: watch::Receiver<bool>,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// Opens the cache directory and the ledger (failing fast if either is
    /// unusable) and queues every seed that is not already cached.
    ///
    /// Must be called from within a Tokio runtime: the ledger writer task is
    /// spawned here.
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `transport` - Network collaborator used by every worker
    /// * `shutdown` - Flips to `true` to stop dispatching and drain
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, CrawlError> {
        let cache = VisitedCache::open(&config.storage.cache_dir)?;

        let ledger_path = &config.storage.ledger_path;
        let previous = if ledger_path.is_file() {
            count_records(ledger_path)?
        } else {
            0
        };
        if previous > 0 {
            tracing::info!(
                "Ledger {} already lists {} pages",
                ledger_path.display(),
                previous
            );
        }
        let (ledger_handle, ledger) = spawn_ledger(ledger_path, LEDGER_BUFFER)?;

        let worker = Arc::new(FetchWorker::new(
            transport,
            cache.clone(),
            ledger_handle,
            &config.crawler,
            &config.storage,
            shutdown.clone(),
        ));

        let mut scheduler = Scheduler::new(config.crawler.workers);
        for seed in &config.seeds {
            let url = parse_seed(seed)?;
            if cache.exists(&url) {
                tracing::info!("Seed {} is already cached, skipping", url);
                continue;
            }
            scheduler.enqueue(url);
        }

        tracing::info!(
            "Frontier seeded with {} of {} seeds, {} workers",
            scheduler.frontier_size(),
            config.seeds.len(),
            scheduler.pool_size()
        );

        Ok(Self {
            scheduler,
            worker,
            cache,
            ledger,
            shutdown,
        })
    }

    /// Runs the main crawl loop until the frontier is exhausted
    ///
    /// The loop fills every free pool slot from the frontier, then sleeps
    /// until a worker finishes or shutdown is requested. It never polls.
    /// The crawl ends when the frontier is empty and no worker is in flight,
    /// or, after shutdown, when the in-flight workers have drained.
    ///
    /// Per-URL failures are counted in the summary. The only errors are a
    /// ledger that can no longer be written and internal invariant breaks.
    pub async fn run(self) -> Result<CrawlSummary, CrawlError> {
        let Coordinator {
            mut scheduler,
            worker,
            cache,
            ledger,
            mut shutdown,
        } = self;

        let start_time = Instant::now();
        let mut summary = CrawlSummary::default();
        let mut tasks: JoinSet<(Url, Result<PageReport, CrawlError>)> = JoinSet::new();
        let mut fatal: Option<CrawlError> = None;
        let mut draining = *shutdown.borrow();

        if draining {
            summary.interrupted = true;
        }

        loop {
            if !draining {
                while let Some(scheduled) = scheduler.next_dispatch() {
                    let worker = Arc::clone(&worker);
                    tasks.spawn(async move {
                        let ScheduledFetch { url, permit } = scheduled;
                        let result = worker.process(&url).await;
                        drop(permit);
                        (url, result)
                    });
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { continue };
                    match joined {
                        Ok((_, Ok(report))) => {
                            record_report(&mut scheduler, &cache, &mut summary, report, draining);
                        }
                        Ok((url, Err(e))) => {
                            tracing::error!("Stopping crawl, {} could not be recorded: {}", url, e);
                            if let Err(e) = scheduler.complete(&url, PageState::Failed) {
                                tracing::warn!("{}", e);
                            }
                            summary.failed += 1;
                            fatal.get_or_insert(e);
                            draining = true;
                        }
                        Err(e) => {
                            tracing::error!("Worker task died: {}", e);
                            summary.failed += 1;
                        }
                    }

                    let completed = summary.fetched + summary.failed;
                    if completed > 0 && completed % 10 == 0 {
                        let rate = completed as f64 / start_time.elapsed().as_secs_f64();
                        tracing::info!(
                            "Progress: {} pages done ({} failed), {} in frontier, {} in flight, {:.2} pages/sec",
                            completed,
                            summary.failed,
                            scheduler.frontier_size(),
                            scheduler.in_flight(),
                            rate
                        );
                    }
                }
                _ = wait_for_shutdown(&mut shutdown), if !draining => {
                    tracing::info!(
                        "Shutdown requested, draining {} in-flight fetches",
                        tasks.len()
                    );
                    summary.interrupted = true;
                    draining = true;
                }
            }
        }

        summary.abandoned = scheduler.frontier_size();

        // Last ledger handle lives in the worker; dropping it lets the writer finish
        drop(worker);
        let ledger_path = ledger.path().to_path_buf();
        let ledger_result = ledger.finish().await;

        if let Some(e) = fatal {
            if let Err(ledger_error) = ledger_result {
                tracing::error!("Ledger writer failed: {}", ledger_error);
            }
            return Err(e);
        }
        summary.ledger_records = ledger_result?;

        tracing::info!(
            "Crawl finished in {:?}: {} fetched, {} failed, {} new ledger records in {}",
            start_time.elapsed(),
            summary.fetched,
            summary.failed,
            summary.ledger_records,
            ledger_path.display()
        );
        if summary.abandoned > 0 {
            tracing::warn!("{} queued URLs were not fetched", summary.abandoned);
        }

        Ok(summary)
    }
}

/// Folds one worker report into scheduler state and the summary
fn record_report(
    scheduler: &mut Scheduler,
    cache: &VisitedCache,
    summary: &mut CrawlSummary,
    report: PageReport,
    draining: bool,
) {
    if let Err(e) = scheduler.complete(&report.url, report.state) {
        tracing::warn!("{}", e);
    }

    match report.state {
        PageState::Fetched => {
            summary.fetched += 1;
            if report.written {
                summary.written += 1;
            } else {
                summary.already_cached += 1;
            }
        }
        PageState::Failed => summary.failed += 1,
        other => tracing::warn!("{} came back from a worker as {}", report.url, other),
    }

    if draining {
        return;
    }

    for url in report.discovered {
        // A sibling worker may have cached it since the worker checked
        if cache.exists(&url) {
            continue;
        }
        if scheduler.enqueue(url) {
            summary.discovered += 1;
        }
    }
}

/// Runs the main crawl operation
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `transport` - Network collaborator
/// * `shutdown` - Cooperative shutdown signal
///
/// # Example
///
/// ```no_run
/// use gemini_ripple::config::load_config;
/// use gemini_ripple::crawler::run_crawl;
/// use gemini_ripple::transport::GeminiTransport;
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("crawl.toml"))?;
/// let (_stop, shutdown) = tokio::sync::watch::channel(false);
/// let summary = run_crawl(&config, Arc::new(GeminiTransport::new()?), shutdown).await?;
/// println!("{} pages fetched", summary.fetched);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: &Config,
    transport: Arc<dyn Transport>,
    shutdown: watch::Receiver<bool>,
) -> Result<CrawlSummary, CrawlError> {
    let coordinator = Coordinator::new(config, transport, shutdown)?;
    coordinator.run().await
}
