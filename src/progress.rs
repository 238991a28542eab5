// src/progress.rs

/// Receives progress and log lines from running sessions.
///
/// Called from worker and sampler tasks, so implementations must be cheap and
/// must not block.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, downloaded: u64, total: u64);

    fn on_log(&self, _line: &str) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ProgressListener for NoopListener {
    fn on_progress(&self, _downloaded: u64, _total: u64) {}
}

/// Emits a session log line through `tracing` and forwards it to the listener.
macro_rules! session_log {
    ($listener:expr, $task:expr, $($arg:tt)+) => {{
        let line = format!($($arg)+);
        tracing::info!(task = %$task, "{}", line);
        $listener.on_log(&line);
    }};
}

pub(crate) use session_log;
