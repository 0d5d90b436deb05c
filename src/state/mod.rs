//! State module for tracking crawl progress
//!
//! A URL moves through `Pending -> Dispatched -> Fetched | Failed` within a
//! single run. The on-disk cache remembers completed pages across runs; this
//! state only lives for the current process.

mod page_state;

pub use page_state::PageState;
