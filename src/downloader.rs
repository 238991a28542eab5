use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::chunk_index::ChunkIndex;
use crate::context::TaskContext;
use crate::models::Chunk;
use crate::progress::ProgressListener;

/// Errors that end the fetch of a single chunk. They never leave the worker.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected response status {0}")]
    UnexpectedStatus(StatusCode),
    #[error("no data for {0:?}")]
    ReadTimeout(Duration),
    #[error("server sent more than the {expected} requested bytes")]
    Overrun { expected: u64 },
    #[error("body ended after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },
}

/// What happened to one polled chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed,
    /// Already completed before it was polled; no request was made.
    Skipped,
    /// The session was paused or cancelled mid-transfer.
    Interrupted,
    Failed,
}

/// Per-worker tally, summed by the session for its closing log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: usize,
    pub skipped: usize,
    pub interrupted: usize,
    pub failed: usize,
}

impl WorkerStats {
    fn record(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Completed => self.completed += 1,
            ChunkOutcome::Skipped => self.skipped += 1,
            ChunkOutcome::Interrupted => self.interrupted += 1,
            ChunkOutcome::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: WorkerStats) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.interrupted += other.interrupted;
        self.failed += other.failed;
    }
}

enum FetchEnd {
    Finished,
    Cancelled,
}

/// One member of a session's worker pool.
///
/// Pulls chunks off the shared queue until it is empty or the session token
/// is cancelled, and writes each chunk's bytes at the chunk's own offset.
pub struct FetchWorker {
    pub id: usize,
    pub task_id: String,
    pub client: Client,
    pub url: String,
    pub output: PathBuf,
    pub file_size: u64,
    pub read_timeout: Duration,
    pub context: Arc<TaskContext>,
    pub index: Arc<ChunkIndex>,
    pub listener: Arc<dyn ProgressListener>,
    pub token: CancellationToken,
}

impl FetchWorker {
    pub async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while !self.token.is_cancelled() {
            let Some(chunk) = self.context.next_chunk().await else {
                break;
            };
            let outcome = self.process(&chunk).await;
            self.context.finish_unit();
            stats.record(outcome);
        }
        debug!(task = %self.task_id, worker = self.id, ?stats, "worker finished");
        stats
    }

    /// Fetches one chunk and does the bookkeeping for its outcome.
    pub async fn process(&self, chunk: &Chunk) -> ChunkOutcome {
        if self.context.is_completed(chunk).await {
            debug!(task = %self.task_id, start = chunk.start, end = chunk.end, "chunk already completed, skipping");
            return ChunkOutcome::Skipped;
        }

        let mut written = 0;
        let result = self.fetch(chunk, &mut written).await;

        match result {
            Ok(FetchEnd::Finished) if !self.token.is_cancelled() => {
                self.context.mark_completed(chunk).await;
                if let Err(e) = self.index.record_completed(chunk).await {
                    error!(task = %self.task_id, error = %e, "failed to persist chunk completion");
                }
                debug!(task = %self.task_id, worker = self.id, start = chunk.start, end = chunk.end, "chunk completed");
                ChunkOutcome::Completed
            }
            Ok(_) => {
                // the span is overwritten in full when the chunk is fetched again
                self.context.remove_downloaded_bytes(written);
                debug!(task = %self.task_id, worker = self.id, start = chunk.start, written, "chunk interrupted");
                ChunkOutcome::Interrupted
            }
            Err(e) => {
                self.context.remove_downloaded_bytes(written);
                warn!(task = %self.task_id, worker = self.id, start = chunk.start, end = chunk.end, error = %e, "chunk failed");
                self.listener.on_log(&format!("chunk {}-{} failed: {}", chunk.start, chunk.end, e));
                ChunkOutcome::Failed
            }
        }
    }

    async fn fetch(&self, chunk: &Chunk, written: &mut u64) -> Result<FetchEnd, ChunkError> {
        let request = self.client.get(&self.url).header(RANGE, chunk.range_header()).send();
        let resp = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Ok(FetchEnd::Cancelled),
            resp = tokio::time::timeout(self.read_timeout, request) => match resp {
                Err(_) => return Err(ChunkError::ReadTimeout(self.read_timeout)),
                Ok(resp) => resp?,
            },
        };

        let status = resp.status();
        let whole_file = chunk.start == 0 && chunk.len() == self.file_size;
        if status != StatusCode::PARTIAL_CONTENT && !(status == StatusCode::OK && whole_file) {
            return Err(ChunkError::UnexpectedStatus(status));
        }

        let mut file = OpenOptions::new().write(true).open(&self.output).await?;
        file.seek(SeekFrom::Start(chunk.start)).await?;

        let expected = chunk.len();
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    file.flush().await?;
                    return Ok(FetchEnd::Cancelled);
                }
                next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
            };
            let bytes = match next {
                Err(_) => return Err(ChunkError::ReadTimeout(self.read_timeout)),
                Ok(None) => break,
                Ok(Some(item)) => item?,
            };

            let len = bytes.len() as u64;
            if *written + len > expected {
                return Err(ChunkError::Overrun { expected });
            }
            file.write_all(&bytes).await?;
            *written += len;

            let total = self.context.add_downloaded_bytes(len);
            self.listener.on_progress(total, self.file_size);
        }

        if *written != expected {
            return Err(ChunkError::Truncated { received: *written, expected });
        }

        // the index must not claim bytes that are not on disk yet
        file.flush().await?;
        file.sync_data().await?;
        Ok(FetchEnd::Finished)
    }
}
