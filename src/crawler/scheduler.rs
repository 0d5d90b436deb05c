//! Scheduler for managing the crawl frontier
//!
//! This module handles:
//! - The FIFO frontier of URLs waiting for a worker (breadth-first order)
//! - Per-run dedup: a URL is queued at most once per run
//! - The `Pending -> Dispatched -> Fetched | Failed` state of every URL seen
//! - Bounding in-flight fetches with a semaphore

use crate::state::PageState;
use crate::CrawlError;
use ::url::Url;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A URL handed to a worker together with its pool slot
///
/// The slot is released when this value (or the permit moved out of it) is
/// dropped, normally when the worker task finishes.
pub struct ScheduledFetch {
    pub url: Url,
    pub permit: OwnedSemaphorePermit,
}

/// Scheduler owns the frontier and the worker pool slots
///
/// It is driven from a single task (the coordinator loop); workers never touch
/// it directly. Completed pages report back through the coordinator.
pub struct Scheduler {
    /// Slots for concurrent fetches
    pool: Arc<Semaphore>,

    pool_size: usize,

    /// URLs waiting for a worker, oldest first
    frontier: VecDeque<Url>,

    /// Every URL seen this run and where it is in its lifecycle
    states: HashMap<String, PageState>,
}

impl Scheduler {
    /// Creates a scheduler allowing `pool_size` fetches in flight
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            frontier: VecDeque::new(),
            states: HashMap::new(),
        }
    }

    /// Adds a URL to the back of the frontier
    ///
    /// Returns false (and does nothing) if the URL was already seen this run,
    /// whatever state it reached.
    pub fn enqueue(&mut self, url: Url) -> bool {
        if self.states.contains_key(url.as_str()) {
            return false;
        }
        self.states.insert(url.to_string(), PageState::Pending);
        self.frontier.push_back(url);
        true
    }

    /// Takes the next URL if a pool slot is free
    ///
    /// Returns `None` when the frontier is empty or every slot is taken. Never
    /// waits: the caller blocks on worker completions instead.
    pub fn next_dispatch(&mut self) -> Option<ScheduledFetch> {
        if self.frontier.is_empty() {
            return None;
        }
        let permit = Arc::clone(&self.pool).try_acquire_owned().ok()?;
        let url = self.frontier.pop_front()?;

        self.states.insert(url.to_string(), PageState::Dispatched);
        tracing::trace!("Dispatching {} ({} left in frontier)", url, self.frontier.len());

        Some(ScheduledFetch { url, permit })
    }

    /// Records the terminal state of a dispatched URL
    pub fn complete(&mut self, url: &Url, state: PageState) -> Result<(), CrawlError> {
        let current = self.states.get(url.as_str()).copied();
        match current {
            Some(from) if from.can_transition_to(state) => {
                self.states.insert(url.to_string(), state);
                Ok(())
            }
            Some(from) => Err(CrawlError::InvalidTransition {
                url: url.to_string(),
                from,
                to: state,
            }),
            None => Err(CrawlError::InvalidTransition {
                url: url.to_string(),
                from: PageState::Pending,
                to: state,
            }),
        }
    }

    /// Number of URLs waiting for a worker
    pub fn frontier_size(&self) -> usize {
        self.frontier.len()
    }

    /// Number of pool slots currently held by workers
    pub fn in_flight(&self) -> usize {
        self.pool_size - self.pool.available_permits()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}
