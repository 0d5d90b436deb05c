//! Content-addressed page cache
//!
//! Every URL maps to exactly one file `<sha256-hex>.<ext>` inside the cache
//! directory. The mapping is a pure function of the URL string, so the same
//! URL lands on the same file in every run.

use crate::storage::{StorageError, StorageResult};
use ::url::Url;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Extension token used when a URL path carries no usable extension
pub const NO_EXTENSION: &str = "noext";

#[allow(clippy::unwrap_used)]
static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]{1,5}$").unwrap());

/// Deterministic on-disk identity of a URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIdentity {
    digest: String,
    extension: Option<String>,
}

impl CacheIdentity {
    /// Computes the identity of a URL
    ///
    /// The digest covers the full URL string, so two URLs that only differ in
    /// something the extension heuristic ignores still get distinct files.
    pub fn for_url(url: &Url) -> Self {
        let digest = hex::encode(Sha256::digest(url.as_str().as_bytes()));
        Self {
            digest,
            extension: extension_of(url),
        }
    }

    /// Hex-encoded SHA-256 of the URL
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The extension token, or [`NO_EXTENSION`]
    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or(NO_EXTENSION)
    }

    /// File name of the cache entry
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.digest, self.extension())
    }
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.digest, self.extension())
    }
}

/// Best-effort extension from the text after the last `.` in the URL path
fn extension_of(url: &Url) -> Option<String> {
    let path = url.path();
    let (_, candidate) = path.rsplit_once('.')?;
    if EXTENSION_RE.is_match(candidate) {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Result of offering a page body to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// True only for the call that actually published the entry
    pub written: bool,
    pub identity: CacheIdentity,
}

/// Directory of page bodies keyed by [`CacheIdentity`]
#[derive(Debug, Clone)]
pub struct VisitedCache {
    root: PathBuf,
}

impl VisitedCache {
    /// Opens (creating if needed) the cache directory
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StorageError::CacheDir {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// The cache directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `url`, whether or not it exists yet
    pub fn location_for(&self, url: &Url) -> PathBuf {
        self.root.join(CacheIdentity::for_url(url).file_name())
    }

    /// Returns true if the entry for `url` has been published
    pub fn exists(&self, url: &Url) -> bool {
        self.location_for(url).is_file()
    }

    /// Writes `body` as the entry for `url` unless it already exists
    ///
    /// The body goes to a hidden staging file in the cache directory first and
    /// is then linked into place without clobbering. A reader either sees no
    /// entry or the complete body. When two writers race on the same URL the
    /// loser gets `written == false`, so exactly one caller reports the write.
    pub fn save(&self, url: &Url, body: &[u8]) -> StorageResult<SaveOutcome> {
        let identity = CacheIdentity::for_url(url);
        let location = self.root.join(identity.file_name());

        if location.is_file() {
            return Ok(SaveOutcome {
                written: false,
                identity,
            });
        }

        let write_err = |source: io::Error| StorageError::CacheWrite {
            path: location.clone(),
            source,
        };

        let mut staged = tempfile::Builder::new()
            .prefix(".staging-")
            .tempfile_in(&self.root)
            .map_err(write_err)?;
        staged.write_all(body).map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;

        match staged.persist_noclobber(&location) {
            Ok(_) => Ok(SaveOutcome {
                written: true,
                identity,
            }),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(SaveOutcome {
                written: false,
                identity,
            }),
            Err(e) => Err(write_err(e.error)),
        }
    }
}
