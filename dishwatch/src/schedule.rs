//! Cancellable periodic tasks.
//!
//! A [`PeriodicTask`] runs an async tick function on a fixed interval on the
//! tokio runtime. Ticks never overlap: a tick that outlasts the period delays
//! the next one instead of bunching missed ticks together.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest accepted period. `tokio::time::interval` rejects zero.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A background task that runs a tick function every `period`.
///
/// The first tick fires immediately. Dropping the task aborts it; use
/// [`PeriodicTask::cancel`] to also wait until it has stopped.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawns `tick` to run every `period` (clamped to [`MIN_PERIOD`]).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let period = period.max(MIN_PERIOD);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(task = %task_name, ?period, "periodic task started");

            loop {
                interval.tick().await;
                tick().await;
            }
        });

        Self {
            name,
            period,
            handle: Some(handle),
        }
    }

    /// The task name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns `true` until the task is cancelled or has died.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the task and waits for it to finish.
    ///
    /// A tick in progress is interrupted at its next await point. Calling
    /// `cancel` again is a no-op.
    pub async fn cancel(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        handle.abort();
        match handle.await {
            Err(e) if e.is_panic() => {
                tracing::warn!(task = %self.name, "periodic task panicked: {e}");
            }
            _ => tracing::debug!(task = %self.name, "periodic task stopped"),
        }
    }

    /// Stops the task without waiting.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.abort();
    }
}
