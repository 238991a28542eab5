//! Durable per-chunk completion record.
//!
//! The index is a UTF-8 text file with one `start-end-status` line per chunk,
//! `status` being `1` (downloaded) or `0`. Two-field `start-end` lines written
//! by older versions are read as downloaded.

use crate::models::{Chunk, ChunkStatus};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Name of the index file inside a task's temporary directory.
pub const INDEX_FILE_NAME: &str = "index.txt";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to write chunk index {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads every parseable record from the index at `path`.
///
/// Never fails: a missing file yields nothing, malformed lines are skipped
/// with a warning, and any other read error is logged and treated as empty.
pub async fn load(path: &Path) -> Vec<Chunk> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read chunk index, starting fresh");
            return Vec::new();
        }
    };

    let mut chunks = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(chunk) => chunks.push(chunk),
            None => warn!(path = %path.display(), line, "skipping malformed chunk index line"),
        }
    }
    chunks
}

fn parse_line(line: &str) -> Option<Chunk> {
    let parts: Vec<&str> = line.split('-').collect();
    let (start, end, status) = match parts.as_slice() {
        [start, end, status] => {
            let status = match *status {
                "1" => ChunkStatus::Downloaded,
                "0" => ChunkStatus::NotDownloaded,
                _ => return None,
            };
            (start, end, status)
        }
        [start, end] => (start, end, ChunkStatus::Downloaded),
        _ => return None,
    };
    let start = start.parse::<u64>().ok()?;
    let end = end.parse::<u64>().ok()?;
    if end < start {
        return None;
    }
    Some(Chunk { start, end, status })
}

fn render(chunks: &[Chunk]) -> String {
    let mut sorted: Vec<&Chunk> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.start);

    let mut out = String::with_capacity(sorted.len() * 24);
    for c in sorted {
        let status = if c.is_downloaded() { 1 } else { 0 };
        out.push_str(&format!("{}-{}-{}\n", c.start, c.end, status));
    }
    out
}

/// Overwrites the index at `path` with one line per chunk.
///
/// The content is written to a sibling file first and renamed into place, so
/// a crash mid-write leaves the previous index intact.
pub async fn save(path: &Path, chunks: &[Chunk]) -> Result<(), IndexError> {
    let tmp = path.with_extension("txt.tmp");
    let wrap = |source| IndexError::Write { path: path.to_path_buf(), source };

    tokio::fs::write(&tmp, render(chunks)).await.map_err(wrap)?;
    tokio::fs::rename(&tmp, path).await.map_err(wrap)?;
    Ok(())
}

/// Overlays loaded statuses onto a freshly partitioned chunk set.
///
/// A partitioned chunk becomes Downloaded only if `loaded` holds a Downloaded
/// record with the same `(start, end)`. Loaded records that match nothing,
/// e.g. from a different partitioning scheme, are ignored.
pub fn merge(partitioned: &[Chunk], loaded: &[Chunk]) -> Vec<Chunk> {
    let downloaded: HashSet<&Chunk> = loaded.iter().filter(|c| c.is_downloaded()).collect();

    partitioned
        .iter()
        .map(|c| {
            let status = if downloaded.contains(c) {
                ChunkStatus::Downloaded
            } else {
                ChunkStatus::NotDownloaded
            };
            Chunk { status, ..*c }
        })
        .collect()
}

/// Sum of the sizes of the Downloaded records.
pub fn downloaded_bytes(chunks: &[Chunk]) -> u64 {
    chunks.iter().filter(|c| c.is_downloaded()).map(Chunk::len).sum()
}

/// The on-disk index of one running session.
///
/// Workers finish chunks concurrently and every completion rewrites the whole
/// file, so updates and writes happen under one lock.
#[derive(Debug)]
pub struct ChunkIndex {
    path: PathBuf,
    chunks: Mutex<Vec<Chunk>>,
}

impl ChunkIndex {
    /// Writes the full merged set once and returns the live index.
    pub async fn create(path: PathBuf, chunks: Vec<Chunk>) -> Result<Self, IndexError> {
        save(&path, &chunks).await?;
        Ok(Self { path, chunks: Mutex::new(chunks) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks `chunk` Downloaded and persists the index.
    pub async fn record_completed(&self, chunk: &Chunk) -> Result<(), IndexError> {
        let mut chunks = self.chunks.lock().await;
        match chunks.iter_mut().find(|c| **c == *chunk) {
            Some(c) => c.status = ChunkStatus::Downloaded,
            None => {
                debug!(start = chunk.start, end = chunk.end, "completed chunk not in index, appending");
                chunks.push(Chunk { status: ChunkStatus::Downloaded, ..*chunk });
            }
        }
        save(&self.path, &chunks).await
    }

    pub async fn snapshot(&self) -> Vec<Chunk> {
        self.chunks.lock().await.clone()
    }
}
