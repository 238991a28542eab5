// src/manager.rs

use crate::chunk_index;
use crate::config::EngineConfig;
use crate::context::TaskContext;
use crate::http;
use crate::models::{SharedTask, TaskStatus};
use crate::progress::{session_log, NoopListener, ProgressListener};
use crate::session::{Session, SessionOutcome, SetupError, TaskPaths};
use reqwest::Client;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session setup failed: {0}")]
    Setup(#[from] SetupError),
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("task in state {0:?} cannot be resumed")]
    NotResumable(TaskStatus),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Book-keeping for a session that has been started and has not yet returned.
struct ActiveSession {
    serial: u64,
    token: CancellationToken,
    /// Cancelled once the session has fully returned.
    done: CancellationToken,
    context: Arc<OnceLock<Arc<TaskContext>>>,
}

/// Runs download sessions against caller-owned task descriptors.
///
/// At most one session per task id is active at a time. A paused or cancelled
/// session keeps its slot until its workers have wound down, and a new start
/// for the same task waits for that.
pub struct DownloadEngine {
    config: Arc<EngineConfig>,
    http_client: Client,
    listener: Arc<dyn ProgressListener>,
    sessions: Arc<Mutex<HashMap<String, ActiveSession>>>,
    next_serial: AtomicU64,
}

impl DownloadEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let http_client = http::build_client(&config)?;
        Ok(Self {
            config: Arc::new(config),
            http_client,
            listener: Arc::new(NoopListener),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_serial: AtomicU64::new(1),
        })
    }

    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Downloads the task until it completes, drains short, is paused or is
    /// cancelled. Returns straight away if the task is already downloading.
    pub async fn start_session(&self, task: &SharedTask) -> Result<SessionOutcome, EngineError> {
        let (id, status) = {
            let t = task.lock().await;
            (t.id.clone(), t.status)
        };
        if status == TaskStatus::Downloading {
            debug!(task = %id, "session already running");
            return Ok(SessionOutcome::AlreadyRunning);
        }
        self.wait_for_previous(&id).await;

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let done = CancellationToken::new();
        let session = {
            let mut t = task.lock().await;
            let mut sessions = self.sessions.lock().await;
            if t.status == TaskStatus::Downloading || sessions.contains_key(&id) {
                return Ok(SessionOutcome::AlreadyRunning);
            }
            t.set_status(TaskStatus::Downloading);
            t.speed = 0;

            let session = Session::new(
                self.http_client.clone(),
                self.config.clone(),
                task.clone(),
                self.listener.clone(),
                token.clone(),
            );
            sessions.insert(
                id.clone(),
                ActiveSession { serial, token, done: done.clone(), context: session.context_slot() },
            );
            session
        };

        let result = session.run().await;

        {
            let mut sessions = self.sessions.lock().await;
            if sessions.get(&id).is_some_and(|s| s.serial == serial) {
                sessions.remove(&id);
            }
        }
        done.cancel();

        match result {
            Ok(outcome) => {
                debug!(task = %id, ?outcome, "session returned");
                Ok(outcome)
            }
            Err(e) => {
                let mut t = task.lock().await;
                if t.status == TaskStatus::Downloading {
                    t.set_status(TaskStatus::Failed);
                    t.speed = 0;
                }
                drop(t);
                session_log!(self.listener, id, "download failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Starts a task that was paused, drained short, or failed during setup.
    pub async fn resume_session(&self, task: &SharedTask) -> Result<SessionOutcome, EngineError> {
        let status = task.lock().await.status;
        match status {
            TaskStatus::Paused | TaskStatus::Waiting | TaskStatus::Failed => self.start_session(task).await,
            TaskStatus::Downloading => Ok(SessionOutcome::AlreadyRunning),
            TaskStatus::Completed | TaskStatus::Canceled => Err(EngineError::NotResumable(status)),
        }
    }

    /// Runs [`start_session`](Self::start_session) on its own task.
    pub fn spawn_session(
        self: &Arc<Self>,
        task: SharedTask,
    ) -> JoinHandle<Result<SessionOutcome, EngineError>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.start_session(&task).await })
    }

    /// Pauses a downloading task. Returns `false` if it was not downloading.
    ///
    /// The downloaded size is taken from the chunk index on disk, so bytes of
    /// chunks that were still in flight are not counted.
    pub async fn pause_session(&self, task: &SharedTask) -> bool {
        let mut t = task.lock().await;
        if t.status != TaskStatus::Downloading {
            return false;
        }

        if let Some(paths) = TaskPaths::for_task(&t) {
            let on_disk = chunk_index::downloaded_bytes(&chunk_index::load(&paths.index).await);
            t.downloaded_size = on_disk.min(t.file_size);
        }
        t.set_status(TaskStatus::Paused);
        t.speed = 0;

        if let Some(session) = self.sessions.lock().await.get(&t.id) {
            session.token.cancel();
        }
        session_log!(self.listener, t.id, "paused at {} of {} bytes", t.downloaded_size, t.file_size);
        true
    }

    /// Cancels a task, stopping its session if one is running, and removes
    /// its chunk index. With `delete_file` the output file goes too.
    pub async fn cancel_session(&self, task: &SharedTask, delete_file: bool) -> Result<(), EngineError> {
        let id = {
            let mut t = task.lock().await;
            t.set_status(TaskStatus::Canceled);
            t.speed = 0;
            t.id.clone()
        };

        let done = {
            let sessions = self.sessions.lock().await;
            sessions.get(&id).map(|s| {
                s.token.cancel();
                s.done.clone()
            })
        };
        if let Some(done) = done {
            done.cancelled().await;
        }

        // the session may have resolved the output name while winding down
        let paths = TaskPaths::for_task(&*task.lock().await);
        if let Some(paths) = paths {
            remove_if_present(&paths.temp_dir, true).await?;
            if delete_file {
                remove_if_present(&paths.output, false).await?;
            }
        }
        session_log!(self.listener, id, "canceled");
        Ok(())
    }

    /// Chunks still to fetch in the task's running session.
    pub async fn remaining_chunks(&self, task_id: &str) -> Option<usize> {
        let sessions = self.sessions.lock().await;
        let context = sessions.get(task_id)?.context.get()?;
        Some(context.remaining_chunks())
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.sessions.lock().await.contains_key(task_id)
    }

    async fn wait_for_previous(&self, task_id: &str) {
        let done = self.sessions.lock().await.get(task_id).map(|s| s.done.clone());
        if let Some(done) = done {
            info!(task = %task_id, "waiting for the previous session to wind down");
            done.cancelled().await;
        }
    }
}

async fn remove_if_present(path: &Path, dir: bool) -> Result<(), EngineError> {
    let result = if dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(EngineError::Io { path: path.to_path_buf(), source: e })
        }
        _ => Ok(()),
    }
}
