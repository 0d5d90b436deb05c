//! Transport collaborator
//!
//! The crawler only needs one call from the network layer: fetch a URL and
//! hand back the header meta plus body, or fail. Any failure, including a
//! non-success status, is treated as retryable by the fetch worker.

mod gemini;

pub use gemini::{parse_header, GeminiTransport, MAX_META_LEN};

use ::url::Url;
use std::time::Duration;
use thiserror::Error;

/// A successful (2x) response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Two-digit status code
    pub status: u8,
    /// Header meta; for success responses this is the MIME type
    pub meta: String,
    pub body: Vec<u8>,
}

/// Errors produced by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Malformed response header: {0}")]
    MalformedHeader(String),

    #[error("Server answered {status}: {meta}")]
    Status { status: u8, meta: String },

    #[error("URL cannot be requested: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The single network call the crawler depends on
///
/// Implementations return `Ok` only for success responses. The timeout is a
/// per-attempt budget; the fetch worker enforces it as well.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Response, TransportError>;
}
