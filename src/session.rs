//! One run of the engine against a task descriptor.
//!
//! A session resolves the remote size, prepares the output file and chunk
//! index, runs the worker pool and speed sampler until the queue drains or the
//! session token is cancelled, and then settles the task's status.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::chunk_index::{self, ChunkIndex, IndexError, INDEX_FILE_NAME};
use crate::config::EngineConfig;
use crate::context::TaskContext;
use crate::downloader::{FetchWorker, WorkerStats};
use crate::filename::{derive_file_name, resolve_output_path};
use crate::http;
use crate::models::{SharedTask, TaskDescriptor, TaskStatus};
use crate::partition::partition;
use crate::progress::{session_log, ProgressListener};
use crate::sampler::SpeedSampler;

/// Failures that stop a session before any chunk is fetched.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("size request failed with status {status}")]
    BadStatus { status: StatusCode },
    #[error("server did not report a content length")]
    MissingContentLength,
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is {actual} bytes but the remote file is {expected} bytes")]
    SizeMismatch { path: PathBuf, actual: u64, expected: u64 },
    #[error("chunk index error: {0}")]
    Index(#[from] IndexError),
}

impl SetupError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> SetupError + '_ {
        move |source| SetupError::Io { path: path.to_path_buf(), source }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The task was already downloading; nothing was started.
    AlreadyRunning,
    Completed,
    Paused,
    Canceled,
    /// The queue drained with chunks still missing; the task is `Waiting`.
    Incomplete { downloaded: u64, remaining_chunks: usize },
}

/// Where a task keeps its output and its chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPaths {
    pub output: PathBuf,
    pub temp_dir: PathBuf,
    pub index: PathBuf,
}

impl TaskPaths {
    pub fn new(output: PathBuf, task_id: &str) -> Self {
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp_dir = parent.join(format!(".temp-{}", task_id));
        let index = temp_dir.join(INDEX_FILE_NAME);
        Self { output, temp_dir, index }
    }

    /// Paths of a task whose file name has been resolved by an earlier session.
    pub fn for_task(task: &TaskDescriptor) -> Option<Self> {
        let name = task.file_name.as_deref()?;
        Some(Self::new(resolve_output_path(&task.save_path, name), &task.id))
    }
}

pub struct Session {
    client: Client,
    config: Arc<EngineConfig>,
    task: SharedTask,
    listener: Arc<dyn ProgressListener>,
    token: CancellationToken,
    context: Arc<OnceLock<Arc<TaskContext>>>,
}

impl Session {
    pub fn new(
        client: Client,
        config: Arc<EngineConfig>,
        task: SharedTask,
        listener: Arc<dyn ProgressListener>,
        token: CancellationToken,
    ) -> Self {
        Self { client, config, task, listener, token, context: Arc::new(OnceLock::new()) }
    }

    /// Filled in with the session's context once setup has finished.
    pub fn context_slot(&self) -> Arc<OnceLock<Arc<TaskContext>>> {
        self.context.clone()
    }

    pub async fn run(self) -> Result<SessionOutcome, SetupError> {
        let (task_id, url, save_path, threads) = {
            let task = self.task.lock().await;
            (task.id.clone(), task.url.clone(), task.save_path.clone(), task.threads)
        };
        let threads = self.config.effective_threads(threads);
        session_log!(self.listener, task_id, "starting download of {} with {} workers", url, threads);

        let file_size = http::content_length(&self.client, &url, self.config.read_timeout()).await?;
        let file_name = derive_file_name(&url);
        let paths = TaskPaths::new(resolve_output_path(&save_path, &file_name), &task_id);
        {
            let mut task = self.task.lock().await;
            task.file_size = file_size;
            task.file_name = paths.output.file_name().map(|n| n.to_string_lossy().into_owned());
        }
        session_log!(self.listener, task_id, "file size {} bytes, saving to {}", file_size, paths.output.display());

        prepare_output_file(&paths.output, file_size).await?;
        tokio::fs::create_dir_all(&paths.temp_dir).await.map_err(SetupError::io(&paths.temp_dir))?;

        let loaded = chunk_index::load(&paths.index).await;
        let merged = chunk_index::merge(&partition(file_size), &loaded);
        let index = Arc::new(ChunkIndex::create(paths.index.clone(), merged.clone()).await?);
        let context = Arc::new(TaskContext::new(&merged));
        if self.context.set(context.clone()).is_err() {
            debug!(task = %task_id, "context slot already filled");
        }

        session_log!(
            self.listener,
            task_id,
            "{} of {} chunks already downloaded, {} queued",
            merged.len() - context.total_chunks(),
            merged.len(),
            context.total_chunks()
        );
        self.task.lock().await.downloaded_size = context.downloaded_bytes();
        self.listener.on_progress(context.downloaded_bytes(), file_size);

        let sampler_token = self.token.child_token();
        let sampler = tokio::spawn(
            SpeedSampler {
                task: self.task.clone(),
                context: context.clone(),
                listener: self.listener.clone(),
                file_size,
                interval: self.config.sample_interval(),
            }
            .run(sampler_token.clone()),
        );

        let mut workers = JoinSet::new();
        for id in 0..threads {
            workers.spawn(
                FetchWorker {
                    id,
                    task_id: task_id.clone(),
                    client: self.client.clone(),
                    url: url.clone(),
                    output: paths.output.clone(),
                    file_size,
                    read_timeout: self.config.read_timeout(),
                    context: context.clone(),
                    index: index.clone(),
                    listener: self.listener.clone(),
                    token: self.token.clone(),
                }
                .run(),
            );
        }

        let mut stats = WorkerStats::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(e) => error!(task = %task_id, error = %e, "worker task failed"),
            }
        }
        sampler_token.cancel();
        if let Err(e) = sampler.await {
            error!(task = %task_id, error = %e, "speed sampler failed");
        }

        let downloaded = context.downloaded_bytes();
        self.listener.on_progress(downloaded, file_size);

        let mut task = self.task.lock().await;
        task.speed = 0;
        // a pause or cancel has already written its own figures
        let detached = self.token.is_cancelled();
        if !detached {
            task.downloaded_size = downloaded;
        }

        if downloaded == file_size && task.status != TaskStatus::Canceled {
            task.downloaded_size = downloaded;
            task.set_status(TaskStatus::Completed);
            drop(task);
            if let Err(e) = tokio::fs::remove_dir_all(&paths.temp_dir).await {
                warn!(task = %task_id, error = %e, "could not remove temporary directory");
            }
            session_log!(self.listener, task_id, "download completed: {}", paths.output.display());
            return Ok(SessionOutcome::Completed);
        }

        let outcome = match task.status {
            TaskStatus::Downloading if !detached => {
                task.set_status(TaskStatus::Waiting);
                SessionOutcome::Incomplete { downloaded, remaining_chunks: context.remaining_chunks() }
            }
            TaskStatus::Canceled => SessionOutcome::Canceled,
            _ => SessionOutcome::Paused,
        };
        drop(task);
        session_log!(
            self.listener,
            task_id,
            "stopped with {} of {} bytes, {} chunks remaining ({:?})",
            downloaded,
            file_size,
            context.remaining_chunks(),
            stats
        );
        Ok(outcome)
    }
}

/// Makes sure the output exists and has the remote file's full length.
///
/// An existing file is only ever grown, never truncated.
async fn prepare_output_file(path: &Path, size: u64) -> Result<(), SetupError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(SetupError::io(parent))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .await
        .map_err(SetupError::io(path))?;

    let existing = file.metadata().await.map_err(SetupError::io(path))?.len();
    if existing < size {
        file.set_len(size).await.map_err(SetupError::io(path))?;
    }

    let actual = file.metadata().await.map_err(SetupError::io(path))?.len();
    if actual != size {
        return Err(SetupError::SizeMismatch { path: path.to_path_buf(), actual, expected: size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn temp_dir_sits_next_to_the_output() {
        let paths = TaskPaths::new(PathBuf::from("/data/iso/disk.iso"), "task_1_2");
        assert_eq!(paths.temp_dir, PathBuf::from("/data/iso/.temp-task_1_2"));
        assert_eq!(paths.index, PathBuf::from("/data/iso/.temp-task_1_2/index.txt"));

        let bare = TaskPaths::new(PathBuf::from("disk.iso"), "t");
        assert_eq!(bare.temp_dir, PathBuf::from("./.temp-t"));
    }

    #[test]
    fn paths_need_a_resolved_file_name() {
        let mut task = TaskDescriptor::new("http://example.com/a.bin", "/data/out.bin", 4);
        assert!(TaskPaths::for_task(&task).is_none());
        task.file_name = Some("a.bin".into());
        assert_eq!(TaskPaths::for_task(&task).unwrap().output, PathBuf::from("/data/out.bin"));
    }

    #[tokio::test]
    async fn output_file_is_preallocated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("out.bin");
        prepare_output_file(&path, 4096).await.unwrap();
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 4096);

        // an existing, already sized file is left alone
        prepare_output_file(&path, 4096).await.unwrap();
    }

    #[tokio::test]
    async fn larger_existing_file_is_a_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        tokio::fs::write(&path, vec![0u8; 100]).await.unwrap();

        let err = prepare_output_file(&path, 10).await.unwrap_err();
        assert!(matches!(err, SetupError::SizeMismatch { actual: 100, expected: 10, .. }));
    }
}
