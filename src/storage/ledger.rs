//! Append-only crawl ledger
//!
//! One line per page that was fetched and published to the cache:
//! `url,identity,content-type`. All appends go through a single writer task
//! fed by a channel, so line order is completion order and lines never
//! interleave.

use crate::storage::{CacheIdentity, StorageError, StorageResult};
use ::url::Url;
use csv::{QuoteStyle, StringRecord, Terminator};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One completed fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub url: String,
    pub identity: String,
    pub content_type: String,
}

impl LedgerRecord {
    pub fn new(url: &Url, identity: &CacheIdentity, content_type: &str) -> Self {
        Self {
            url: url.to_string(),
            identity: identity.to_string(),
            content_type: content_type.to_string(),
        }
    }

    /// Serializes the record as one ledger line, without the trailing newline
    ///
    /// Fields are written bare unless they contain a comma, a double quote or
    /// a line break; those are double-quoted with inner quotes doubled.
    pub fn to_line(&self) -> StorageResult<String> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record([&self.url, &self.identity, &self.content_type])?;

        let bytes = writer
            .into_inner()
            .map_err(|e| StorageError::LedgerWrite(e.into_error()))?;
        let mut line = String::from_utf8(bytes).map_err(|e| {
            StorageError::LedgerWrite(io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(line)
    }

    /// Builds a record from parsed fields
    ///
    /// Lines written before quoting was introduced may carry bare commas inside
    /// the content type; everything after the second field is folded back into
    /// it.
    fn from_fields(fields: &StringRecord) -> Option<Self> {
        if fields.len() < 3 {
            return None;
        }
        Some(Self {
            url: fields[0].to_string(),
            identity: fields[1].to_string(),
            content_type: fields.iter().skip(2).collect::<Vec<_>>().join(","),
        })
    }
}

fn ledger_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(source)
}

/// Parses one ledger line
///
/// Returns `None` for lines with fewer than three fields.
pub fn parse_line(line: &str) -> Option<LedgerRecord> {
    let mut reader = ledger_reader(line.as_bytes());
    let mut fields = StringRecord::new();
    match reader.read_record(&mut fields) {
        Ok(true) => LedgerRecord::from_fields(&fields),
        _ => None,
    }
}

/// Streams every well-formed record of a ledger file into `visit`
///
/// A missing file is an empty ledger. Malformed records are skipped with a
/// warning; read failures are errors.
fn scan_ledger(path: &Path, mut visit: impl FnMut(LedgerRecord)) -> StorageResult<()> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = ledger_reader(BufReader::new(file));
    let mut fields = StringRecord::new();
    loop {
        match reader.read_record(&mut fields) {
            Ok(false) => return Ok(()),
            Ok(true) => match LedgerRecord::from_fields(&fields) {
                Some(record) => visit(record),
                None => tracing::warn!(
                    "Skipping malformed ledger line {}",
                    fields.position().map_or(0, |p| p.line())
                ),
            },
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => tracing::warn!("Skipping unreadable ledger record: {}", e),
        }
    }
}

/// Reads every well-formed record from a ledger file
pub fn read_ledger(path: &Path) -> StorageResult<Vec<LedgerRecord>> {
    let mut records = Vec::new();
    scan_ledger(path, |record| records.push(record))?;
    Ok(records)
}

/// Counts the well-formed records of a ledger file without holding them
pub fn count_records(path: &Path) -> StorageResult<u64> {
    let mut count = 0u64;
    scan_ledger(path, |_| count += 1)?;
    Ok(count)
}

/// Cloneable sending side of the ledger
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<LedgerRecord>,
}

impl LedgerHandle {
    /// Queues a record for the writer task
    ///
    /// Fails only when the writer has stopped, which means an earlier append
    /// failed and the ledger can no longer be trusted.
    pub async fn record(&self, record: LedgerRecord) -> StorageResult<()> {
        self.tx.send(record).await.map_err(|e| {
            StorageError::LedgerClosed(format!("record for {} was not written", e.0.url))
        })
    }
}

/// Owner of the writer task
#[derive(Debug)]
pub struct LedgerWriter {
    path: PathBuf,
    task: JoinHandle<StorageResult<u64>>,
}

impl LedgerWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the writer to drain and returns how many records it appended
    ///
    /// The writer only stops once every [`LedgerHandle`] has been dropped, or
    /// after a failed append.
    pub async fn finish(self) -> StorageResult<u64> {
        self.task
            .await
            .map_err(|e| StorageError::LedgerClosed(e.to_string()))?
    }
}

/// Opens the ledger for appending and starts the single writer task
///
/// Opening happens before this returns, so an unwritable ledger path fails
/// startup instead of the first append.
pub fn spawn_ledger(
    path: impl Into<PathBuf>,
    capacity: usize,
) -> StorageResult<(LedgerHandle, LedgerWriter)> {
    let path = path.into();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| StorageError::LedgerOpen {
            path: path.clone(),
            source,
        })?;

    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(write_records(tokio::fs::File::from_std(file), rx));

    tracing::debug!("Ledger writer started on {}", path.display());
    Ok((LedgerHandle { tx }, LedgerWriter { path, task }))
}

async fn write_records(
    mut file: tokio::fs::File,
    mut rx: mpsc::Receiver<LedgerRecord>,
) -> StorageResult<u64> {
    let mut written = 0u64;

    while let Some(record) = rx.recv().await {
        let mut line = match record.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode ledger record for {}: {}", record.url, e);
                return Err(e);
            }
        };
        line.push('\n');

        if let Err(e) = append(&mut file, line.as_bytes()).await {
            tracing::error!("Failed to append {} to ledger: {}", record.url, e);
            return Err(StorageError::LedgerWrite(e));
        }
        written += 1;
    }

    file.sync_all().await.map_err(StorageError::LedgerWrite)?;
    Ok(written)
}

async fn append(file: &mut tokio::fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}
