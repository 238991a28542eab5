// src/models.rs

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Whether a chunk's bytes are known to be on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkStatus {
    NotDownloaded,
    Downloaded,
}

/// An inclusive byte range of the remote resource.
///
/// Identity is `(start, end)`; `status` is metadata and takes no part in
/// equality or hashing, so a Downloaded and a NotDownloaded record of the same
/// range compare equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
    pub status: ChunkStatus,
}

impl Chunk {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end, status: ChunkStatus::NotDownloaded }
    }

    pub fn downloaded(start: u64, end: u64) -> Self {
        Self { start, end, status: ChunkStatus::Downloaded }
    }

    /// Number of bytes covered by the chunk.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_downloaded(&self) -> bool {
        self.status == ChunkStatus::Downloaded
    }

    /// Value for the `Range` request header.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}

impl Eq for Chunk {}

impl Hash for Chunk {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start.hash(state);
        self.end.hash(state);
    }
}

/// The status of a download task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Downloading,
    Paused,
    Completed,
    Canceled,
    Failed,
}

/// Caller-visible description of one download task.
///
/// The engine only reads and updates fields on the instance it is handed;
/// persisting it is the task store's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub url: String,
    /// Either the output file or a directory to place it in.
    pub save_path: PathBuf,
    pub file_name: Option<String>,
    pub threads: usize,
    pub status: TaskStatus,
    pub file_size: u64,
    pub downloaded_size: u64,
    /// Most recent sampled throughput, in bytes per second.
    pub speed: u64,
    pub added_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A descriptor shared between the caller, the engine and a running session.
pub type SharedTask = Arc<Mutex<TaskDescriptor>>;

impl TaskDescriptor {
    pub fn new(url: impl Into<String>, save_path: impl Into<PathBuf>, threads: usize) -> Self {
        Self {
            id: generate_task_id(),
            url: url.into(),
            save_path: save_path.into(),
            file_name: None,
            threads,
            status: TaskStatus::Waiting,
            file_size: 0,
            downloaded_size: 0,
            speed: 0,
            added_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn into_shared(self) -> SharedTask {
        Arc::new(Mutex::new(self))
    }

    /// Sets the status, stamping the completion time on `Completed`.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        if status == TaskStatus::Completed {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Progress as a whole percentage from 0 to 100.
    pub fn progress_percent(&self) -> u8 {
        if self.file_size == 0 {
            return 0;
        }
        ((self.downloaded_size.min(self.file_size) * 100) / self.file_size) as u8
    }

    /// Estimated time remaining; only known while downloading at a non-zero rate.
    pub fn eta(&self) -> Option<Duration> {
        if self.status != TaskStatus::Downloading || self.speed == 0 {
            return None;
        }
        let remaining = self.file_size.saturating_sub(self.downloaded_size);
        Some(Duration::from_secs_f64(remaining as f64 / self.speed as f64))
    }
}

fn generate_task_id() -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("task_{}_{}", Utc::now().timestamp_millis(), suffix)
}
