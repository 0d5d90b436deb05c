/// Page state definitions for tracking crawl progress
///
/// This module defines all possible states a URL can be in during one crawl run.
use std::fmt;

/// Represents the current state of a URL in the crawl process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    // ===== Active States =====
    /// URL is in the frontier waiting for a worker
    Pending,

    /// URL has been handed to a fetch worker
    Dispatched,

    // ===== Terminal States =====
    /// Page was fetched, offered to the cache and scanned for links
    Fetched,

    /// Every fetch attempt failed, or the fetched body could not be cached
    Failed,
}

impl PageState {
    /// Returns true if `next` is a legal successor of this state
    ///
    /// URLs are never re-queued once dispatched, so the only edges are
    /// `Pending -> Dispatched` and `Dispatched -> Fetched | Failed`.
    pub fn can_transition_to(&self, next: PageState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Dispatched)
                | (Self::Dispatched, Self::Fetched)
                | (Self::Dispatched, Self::Failed)
        )
    }

    /// Short lowercase name used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Fetched => "fetched",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
