//! Storage module for persisting crawl data
//!
//! Two stores live here:
//! - The visited cache: one file per page body under the cache directory,
//!   named by a digest of the URL. Presence of the file is the "already
//!   crawled" check, which also makes restarts resume-safe.
//! - The ledger: an append-only text file with one line per page that was
//!   fetched and written to the cache, fed by a single writer task.

mod cache;
mod ledger;

pub use cache::{CacheIdentity, SaveOutcome, VisitedCache, NO_EXTENSION};
pub use ledger::{
    count_records, parse_line, read_ledger, spawn_ledger, LedgerHandle, LedgerRecord,
    LedgerWriter,
};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write cache entry {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to open ledger {path}: {source}")]
    LedgerOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to append to ledger: {0}")]
    LedgerWrite(std::io::Error),

    #[error("Malformed ledger data: {0}")]
    LedgerFormat(#[from] csv::Error),

    #[error("Ledger writer is no longer running: {0}")]
    LedgerClosed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
