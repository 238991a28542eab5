// src/context.rs

use crate::models::Chunk;
use rand::seq::SliceRandom;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Runtime state of one download session.
///
/// Built from the merged chunk set when a session starts and dropped when it
/// ends; the chunk index on disk is what survives between sessions.
#[derive(Debug)]
pub struct TaskContext {
    pending: Mutex<VecDeque<Chunk>>,
    completed: Mutex<HashSet<Chunk>>,
    downloaded: AtomicU64,
    total_chunks: usize,
    completed_chunks: AtomicUsize,
    finished_units: AtomicUsize,
}

impl TaskContext {
    /// Queues every NotDownloaded chunk in random order.
    ///
    /// The shuffle spreads concurrent requests over the file instead of
    /// having all workers hit neighbouring ranges.
    pub fn new(chunks: &[Chunk]) -> Self {
        let mut pending: Vec<Chunk> = chunks.iter().filter(|c| !c.is_downloaded()).copied().collect();
        pending.shuffle(&mut rand::thread_rng());

        let completed: HashSet<Chunk> = chunks.iter().filter(|c| c.is_downloaded()).copied().collect();
        let downloaded = completed.iter().map(Chunk::len).sum();

        Self {
            total_chunks: pending.len(),
            pending: Mutex::new(pending.into()),
            completed: Mutex::new(completed),
            downloaded: AtomicU64::new(downloaded),
            completed_chunks: AtomicUsize::new(0),
            finished_units: AtomicUsize::new(0),
        }
    }

    /// Takes the next chunk to fetch, if any remain.
    pub async fn next_chunk(&self) -> Option<Chunk> {
        self.pending.lock().await.pop_front()
    }

    pub async fn is_completed(&self, chunk: &Chunk) -> bool {
        self.completed.lock().await.contains(chunk)
    }

    /// Records `chunk` as completed. Returns `false` if it already was.
    pub async fn mark_completed(&self, chunk: &Chunk) -> bool {
        let newly = self.completed.lock().await.insert(*chunk);
        if newly {
            self.completed_chunks.fetch_add(1, Ordering::SeqCst);
        }
        newly
    }

    /// Adds `n` to the shared byte counter and returns the new total.
    pub fn add_downloaded_bytes(&self, n: u64) -> u64 {
        self.downloaded.fetch_add(n, Ordering::SeqCst) + n
    }

    /// Takes back bytes counted for a chunk that did not finish.
    pub fn remove_downloaded_bytes(&self, n: u64) {
        self.downloaded.fetch_sub(n, Ordering::SeqCst);
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Chunks that were pending when the session started.
    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// Chunks completed during this session.
    pub fn completed_chunks(&self) -> usize {
        self.completed_chunks.load(Ordering::SeqCst)
    }

    pub fn remaining_chunks(&self) -> usize {
        self.total_chunks.saturating_sub(self.completed_chunks())
    }

    /// Called once per polled chunk, whatever the outcome.
    pub fn finish_unit(&self) {
        self.finished_units.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finished_units(&self) -> usize {
        self.finished_units.load(Ordering::SeqCst)
    }
}
