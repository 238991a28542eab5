// src/sampler.rs

use crate::context::TaskContext;
use crate::models::{SharedTask, TaskStatus};
use crate::progress::ProgressListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Periodically turns the session's byte counter into a speed figure.
pub struct SpeedSampler {
    pub task: SharedTask,
    pub context: Arc<TaskContext>,
    pub listener: Arc<dyn ProgressListener>,
    pub file_size: u64,
    pub interval: Duration,
}

impl SpeedSampler {
    /// Samples until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        let mut last_bytes = self.context.downloaded_bytes();
        let mut last_at = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let current = self.context.downloaded_bytes();
            // rolled-back partial chunks can move the counter backwards
            let speed = bytes_per_second(current.saturating_sub(last_bytes), now - last_at);

            let eta = {
                let mut task = self.task.lock().await;
                // pause and cancel write their own figures
                if task.status != TaskStatus::Downloading {
                    break;
                }
                task.speed = speed;
                task.downloaded_size = current;
                task.eta()
            };
            self.listener.on_progress(current, self.file_size);
            trace!(downloaded = current, speed, ?eta, "sampled");

            last_bytes = current;
            last_at = now;
        }
    }
}

pub fn bytes_per_second(delta: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (delta as f64 / secs) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskDescriptor;
    use crate::partition::partition;
    use crate::progress::NoopListener;

    #[test]
    fn rate_is_scaled_to_seconds() {
        assert_eq!(bytes_per_second(1000, Duration::from_millis(500)), 2000);
        assert_eq!(bytes_per_second(1000, Duration::ZERO), 0);
        assert_eq!(bytes_per_second(0, Duration::from_secs(1)), 0);
    }

    #[tokio::test]
    async fn writes_progress_back_and_stops_on_cancel() {
        let mut descriptor = TaskDescriptor::new("http://example.com/a.bin", "/tmp", 2);
        descriptor.set_status(TaskStatus::Downloading);
        descriptor.file_size = 1000;
        let task = descriptor.into_shared();
        let context = Arc::new(TaskContext::new(&partition(1000)));

        let sampler = SpeedSampler {
            task: task.clone(),
            context: context.clone(),
            listener: Arc::new(NoopListener),
            file_size: 1000,
            interval: Duration::from_millis(20),
        };
        let token = CancellationToken::new();
        let handle = tokio::spawn(sampler.run(token.clone()));

        context.add_downloaded_bytes(600);
        tokio::time::sleep(Duration::from_millis(80)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert_eq!(task.lock().await.downloaded_size, 600);
    }
}
