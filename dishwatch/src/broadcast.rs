//! Periodic push of [`Snapshot`]s to subscribers.
//!
//! There is at most one broadcast loop per process. Starting a new session
//! cancels the previous loop and waits for it to stop before the new one is
//! spawned, so two loops never push concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::monitor::{Monitor, Snapshot};
use crate::schedule::PeriodicTask;

/// Default interval between pushes.
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the single process-wide broadcast loop.
#[derive(Debug)]
pub struct Broadcaster {
    monitor: Arc<Monitor>,
    current: Mutex<Option<PeriodicTask>>,
}

impl Broadcaster {
    /// Creates an idle broadcaster reading from `monitor`.
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self {
            monitor,
            current: Mutex::new(None),
        }
    }

    /// Starts pushing the latest `retention_secs` window to `sink` every
    /// `push_interval`, replacing any running session.
    ///
    /// `max_data_points` is re-read from the settings on every push. A tick
    /// whose snapshot cannot be computed is logged and skipped.
    pub async fn start<F>(&self, retention_secs: u64, push_interval: Duration, sink: F)
    where
        F: Fn(Snapshot) + Send + Sync + 'static,
    {
        let mut current = self.current.lock().await;
        if let Some(mut previous) = current.take() {
            previous.cancel().await;
            tracing::info!("previous broadcast session cancelled");
        }

        let monitor = Arc::clone(&self.monitor);
        let sink = Arc::new(sink);
        let task = PeriodicTask::spawn("broadcast", push_interval, move || {
            let monitor = Arc::clone(&monitor);
            let sink = Arc::clone(&sink);
            async move {
                let max_points = monitor.settings().get().max_points();
                match monitor.latest(retention_secs, max_points) {
                    Ok(snapshot) => (*sink)(snapshot),
                    Err(e) => tracing::warn!(error = %e, "broadcast tick failed"),
                }
            }
        });

        tracing::info!(retention_secs, ?push_interval, "broadcast session started");
        *current = Some(task);
    }

    /// Stops the running session, if any, and waits for it to finish.
    pub async fn stop(&self) {
        if let Some(mut task) = self.current.lock().await.take() {
            task.cancel().await;
            tracing::info!("broadcast session stopped");
        }
    }

    /// Returns `true` while a session is running.
    pub async fn is_running(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(PeriodicTask::is_running)
    }
}
