//! Background polling of the dish and the speedtest tool.
//!
//! Three independent periodic tasks feed the [`SeriesStore`]:
//!
//! | Task      | Default period | Writes              |
//! |-----------|----------------|---------------------|
//! | status    | 1 s            | [`Source::Status`]  |
//! | history   | 30 s           | [`Source::History`] |
//! | speedtest | 15 min         | [`Source::Speedtest`] |
//!
//! A failed tick is logged and skipped; the next tick retries at the fixed
//! period. Each poll operation is also callable directly, which is how the
//! CLI and the tests drive a single tick.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::collect::{Dish, SpeedTester};
use crate::error::Result;
use crate::schedule::PeriodicTask;
use crate::settings::SettingsFile;
use crate::store::{BatchOutcome, SeriesStore, Source, unix_now};
use crate::unroll::unroll;
use crate::value::Value;

/// Status field holding the dish uptime in seconds.
pub const UPTIME_FIELD: &str = "deviceState.uptimeS";

/// Poll periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Period of the status task.
    pub status_interval: Duration,
    /// Period of the history task.
    pub history_interval: Duration,
    /// Period of the speedtest task.
    pub speedtest_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(1),
            history_interval: Duration::from_secs(30),
            speedtest_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Result of a speedtest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedtestOutcome {
    /// The test ran and its row was stored under this index.
    Recorded(u64),
    /// Scheduled tests are disabled in the settings.
    Disabled,
    /// Another test is still running.
    InFlight,
}

/// Fetches from the collaborators and appends to the store.
#[derive(Debug)]
pub struct Poller<D, S> {
    dish: D,
    speedtester: S,
    store: Arc<SeriesStore>,
    settings: Arc<SettingsFile>,
    speedtest_gate: Mutex<()>,
    history_uptime: std::sync::Mutex<Option<u64>>,
}

impl<D: Dish, S: SpeedTester> Poller<D, S> {
    /// Creates a poller writing into `store`.
    pub fn new(dish: D, speedtester: S, store: Arc<SeriesStore>, settings: Arc<SettingsFile>) -> Self {
        Self {
            dish,
            speedtester,
            store,
            settings,
            speedtest_gate: Mutex::new(()),
            history_uptime: std::sync::Mutex::new(None),
        }
    }

    /// The dish this poller reads from, for one-off requests.
    pub fn dish(&self) -> &D {
        &self.dish
    }

    /// The store this poller writes into.
    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    /// Fetches one status row and appends it.
    ///
    /// Returns the index assigned to the row.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; nothing is stored in that case.
    pub async fn poll_status(&self) -> Result<u64> {
        let row = self.dish.fetch_status().await?;
        let index = self.store.append(Source::Status, row, unix_now());
        tracing::debug!(source = "status", index, "polled");
        Ok(index)
    }

    /// Fetches the history ring, unrolls it and merges it into the store.
    ///
    /// The uptime from the newest status row, if any, caps the number of ring
    /// slots treated as valid. An uptime lower than the one seen at the
    /// previous history poll means the dish restarted, and the batch replaces
    /// the stored history even if its indices collide with stored ones.
    ///
    /// # Errors
    ///
    /// Returns the fetch or unroll error; the stored history is untouched in
    /// that case.
    pub async fn poll_history(&self) -> Result<BatchOutcome> {
        let snapshot = self.dish.fetch_history().await?;
        let now = unix_now();
        let uptime = self.latest_uptime();
        let batch = unroll(&snapshot, uptime, now)?;
        let outcome = if self.record_uptime(uptime) {
            self.store.replace_history(Source::History, batch, now)
        } else {
            self.store.append_history_batch(Source::History, batch, now)
        };
        tracing::debug!(source = "history", current = snapshot.current, ?outcome, "polled");
        Ok(outcome)
    }

    /// Runs a scheduled speedtest, unless disabled or already running.
    ///
    /// # Errors
    ///
    /// Returns the speedtest error; nothing is stored in that case.
    pub async fn poll_speedtest(&self) -> Result<SpeedtestOutcome> {
        if !self.settings.get().speedtest_enabled {
            return Ok(SpeedtestOutcome::Disabled);
        }
        self.trigger_speedtest().await
    }

    /// Runs a speedtest now, regardless of the enabled setting.
    ///
    /// At most one test runs at a time; a call made while one is in flight
    /// returns [`SpeedtestOutcome::InFlight`] without waiting.
    ///
    /// # Errors
    ///
    /// Returns the speedtest error; nothing is stored in that case.
    pub async fn trigger_speedtest(&self) -> Result<SpeedtestOutcome> {
        let Ok(_guard) = self.speedtest_gate.try_lock() else {
            return Ok(SpeedtestOutcome::InFlight);
        };
        let row = self.speedtester.run_speedtest().await?;
        let index = self.store.append(Source::Speedtest, row, unix_now());
        tracing::info!(source = "speedtest", index, "speedtest recorded");
        Ok(SpeedtestOutcome::Recorded(index))
    }

    /// Returns `true` while a speedtest is running.
    pub fn speedtest_in_flight(&self) -> bool {
        self.speedtest_gate.try_lock().is_err()
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // checked finite and non-negative
    fn latest_uptime(&self) -> Option<u64> {
        let status = self.store.latest_raw(Source::Status);
        let uptime = status.latest_value(UPTIME_FIELD).and_then(Value::to_number)?;
        (uptime.is_finite() && uptime >= 0.0).then(|| uptime as u64)
    }

    /// Remembers `uptime` for the next history poll and reports whether it
    /// went backwards since the last one.
    fn record_uptime(&self, uptime: Option<u64>) -> bool {
        let Some(uptime) = uptime else {
            return false;
        };
        let mut last = self
            .history_uptime
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let restarted = last.is_some_and(|previous| uptime < previous);
        *last = Some(uptime);
        restarted
    }

    /// Starts the three periodic tasks.
    pub fn spawn(self: &Arc<Self>, config: PollerConfig) -> PollerTasks {
        let status = {
            let poller = Arc::clone(self);
            PeriodicTask::spawn("poll-status", config.status_interval, move || {
                let poller = Arc::clone(&poller);
                async move {
                    if let Err(e) = poller.poll_status().await {
                        tracing::warn!(source = "status", error = %e, "poll failed");
                    }
                }
            })
        };

        let history = {
            let poller = Arc::clone(self);
            PeriodicTask::spawn("poll-history", config.history_interval, move || {
                let poller = Arc::clone(&poller);
                async move {
                    if let Err(e) = poller.poll_history().await {
                        tracing::warn!(source = "history", error = %e, "poll failed");
                    }
                }
            })
        };

        let speedtest = {
            let poller = Arc::clone(self);
            PeriodicTask::spawn("poll-speedtest", config.speedtest_interval, move || {
                let poller = Arc::clone(&poller);
                async move {
                    match poller.poll_speedtest().await {
                        Ok(SpeedtestOutcome::InFlight) => {
                            tracing::debug!(source = "speedtest", "previous test still running");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(source = "speedtest", error = %e, "poll failed"),
                    }
                }
            })
        };

        tracing::info!(
            status = ?config.status_interval,
            history = ?config.history_interval,
            speedtest = ?config.speedtest_interval,
            "poller started"
        );

        PollerTasks {
            tasks: vec![status, history, speedtest],
        }
    }
}

/// Handles to the running poll tasks.
#[derive(Debug)]
pub struct PollerTasks {
    tasks: Vec<PeriodicTask>,
}

impl PollerTasks {
    /// Returns `true` while every task is running.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().all(PeriodicTask::is_running)
    }

    /// Cancels every task and waits for them to stop.
    pub async fn shutdown(&mut self) {
        for task in &mut self.tasks {
            task.cancel().await;
        }
        tracing::info!("poller stopped");
    }
}
