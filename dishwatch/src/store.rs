//! Retention-bounded series storage.
//!
//! The [`SeriesStore`] holds one [`Series`] per [`Source`]. Each entry sits
//! behind its own `RwLock<Arc<Series>>`: readers clone the `Arc` and get a
//! consistent immutable snapshot, writers mutate under the write lock and
//! copy the series only when a reader still holds the previous snapshot.
//!
//! # Design
//!
//! - One writer per source (the poller task for that source)
//! - Appends keep `index` and `timestamp` non-decreasing
//! - Index counters survive trimming, so a trimmed series never reuses an
//!   index
//! - Retention trimming removes a contiguous oldest-first prefix
//!
//! # Example Usage
//!
//! ```rust
//! use dishwatch::store::{SeriesStore, Source, StoreConfig};
//! use dishwatch::value::Row;
//!
//! let store = SeriesStore::new(StoreConfig::default());
//! store.append(Source::Status, Row::new(100.0).with_field("snr", 9.0), 100.0);
//! store.append(Source::Status, Row::new(101.0).with_field("snr", 8.5), 101.0);
//!
//! let status = store.latest_raw(Source::Status);
//! assert_eq!(status.indices(), &[0, 1]);
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::series::Series;
use crate::value::Row;

/// Default retention window for the device sources: 72 hours.
pub const DEFAULT_RETENTION_SECS: f64 = 72.0 * 3600.0;

/// Current wall-clock time in seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// A telemetry source, each backed by its own series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// High-frequency `get_status` samples.
    Status,
    /// Unrolled `get_history` ring buffers.
    History,
    /// Bandwidth test results.
    Speedtest,
}

impl Source {
    /// All sources, in storage order.
    pub const ALL: [Source; 3] = [Source::Status, Source::History, Source::Speedtest];

    /// Returns the lowercase source name.
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Status => "status",
            Source::History => "history",
            Source::Speedtest => "speedtest",
        }
    }

    fn slot(self) -> usize {
        match self {
            Source::Status => 0,
            Source::History => 1,
            Source::Speedtest => 2,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a source keeps its rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep rows with `timestamp >= now - secs`.
    Window(f64),
    /// Never trim.
    RetainAll,
}

impl RetentionPolicy {
    /// Cutoff timestamp for this policy at `now`, or `None` for
    /// [`RetentionPolicy::RetainAll`].
    pub fn cutoff(self, now: f64) -> Option<f64> {
        match self {
            RetentionPolicy::Window(secs) => Some(now - secs),
            RetentionPolicy::RetainAll => None,
        }
    }
}

/// Retention policy per source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Retention of the status series.
    pub status: RetentionPolicy,
    /// Retention of the history series.
    pub history: RetentionPolicy,
    /// Retention of the speedtest series.
    pub speedtest: RetentionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            status: RetentionPolicy::Window(DEFAULT_RETENTION_SECS),
            history: RetentionPolicy::Window(DEFAULT_RETENTION_SECS),
            speedtest: RetentionPolicy::RetainAll,
        }
    }
}

impl StoreConfig {
    /// Returns the policy for `source`.
    pub fn policy(&self, source: Source) -> RetentionPolicy {
        match source {
            Source::Status => self.status,
            Source::History => self.history,
            Source::Speedtest => self.speedtest,
        }
    }
}

/// What [`SeriesStore::append_history_batch`] did with a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch was empty.
    Empty,
    /// The batch overlapped the stored series; this many newer rows were
    /// appended (possibly zero).
    Appended(usize),
    /// The batch did not overlap (or the store was empty) and replaced the
    /// stored series.
    Replaced(usize),
}

#[derive(Debug, Default)]
struct Entry {
    series: Arc<Series>,
    /// Next index to synthesize. Never decreases, even when rows are trimmed.
    next_index: u64,
}

impl Entry {
    fn bump_next_index(&mut self) {
        if let Some(last) = self.series.last_index() {
            self.next_index = self.next_index.max(last + 1);
        }
    }
}

/// Per-source series storage with retention.
///
/// Shared by `Arc` between the poller (writer) and the read side.
#[derive(Debug)]
pub struct SeriesStore {
    config: StoreConfig,
    entries: [RwLock<Entry>; 3],
}

impl SeriesStore {
    /// Creates a store with empty series for every source.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            entries: Default::default(),
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn write(&self, source: Source) -> RwLockWriteGuard<'_, Entry> {
        // A panicked writer leaves a fully formed series behind: every
        // mutation completes before the guard is released.
        self.entries[source.slot()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one row and applies the source's retention policy.
    ///
    /// A row without an index, or with one not greater than the last stored
    /// index, gets the next synthesized index. A timestamp older than the
    /// last stored one is clamped to it.
    ///
    /// Returns the index assigned to the row.
    pub fn append(&self, source: Source, row: Row, now: f64) -> u64 {
        let mut entry = self.write(source);

        let index = match row.index {
            Some(index) if index >= entry.next_index => index,
            _ => entry.next_index,
        };
        let timestamp = entry
            .series
            .last_timestamp()
            .map_or(row.timestamp, |last| row.timestamp.max(last));

        Arc::make_mut(&mut entry.series).push(index, timestamp, row.fields);
        entry.next_index = index + 1;

        if let Some(cutoff) = self.config.policy(source).cutoff(now) {
            Self::trim_entry(&mut entry, cutoff);
        }

        index
    }

    /// Merges an unrolled history batch into the stored series.
    ///
    /// - Empty batch: no-op.
    /// - Empty store, or no batch index present in the stored series: the
    ///   batch replaces the series. A disjoint batch means the device
    ///   restarted its ring.
    /// - Otherwise only batch rows with an index greater than the largest
    ///   stored index are appended.
    ///
    /// Applying the same batch twice is a no-op the second time.
    pub fn append_history_batch(&self, source: Source, batch: Series, now: f64) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::Empty;
        }

        let mut entry = self.write(source);
        let overlaps = batch
            .indices()
            .iter()
            .any(|&index| entry.series.contains_index(index));

        let outcome = if overlaps {
            let last_index = entry.series.last_index().unwrap_or_default();
            let from = batch.indices().partition_point(|&index| index <= last_index);
            let last_ts = entry.series.last_timestamp().unwrap_or(f64::MIN);
            let series = Arc::make_mut(&mut entry.series);

            for position in from..batch.len() {
                if let Some(row) = batch.row(position) {
                    let index = row.index.unwrap_or(last_index + 1);
                    series.push(index, row.timestamp.max(last_ts), row.fields);
                }
            }
            BatchOutcome::Appended(batch.len() - from)
        } else {
            if !entry.series.is_empty() {
                tracing::info!(
                    source = %source,
                    stored_last = ?entry.series.last_index(),
                    batch_first = ?batch.first_index(),
                    "history discontinuity, replacing stored series"
                );
            }
            Self::replace_entry(&mut entry, batch)
        };

        self.finish_batch(source, &mut entry, now);
        outcome
    }

    /// Replaces the stored series with `batch` regardless of overlap.
    ///
    /// Used when the caller knows the device restarted, since a restarted
    /// counter can reuse indices that are still inside the retention window.
    /// An empty batch is a no-op.
    pub fn replace_history(&self, source: Source, batch: Series, now: f64) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::Empty;
        }

        let mut entry = self.write(source);
        tracing::info!(
            source = %source,
            stored_last = ?entry.series.last_index(),
            batch_first = ?batch.first_index(),
            "device restarted, replacing stored series"
        );
        let outcome = Self::replace_entry(&mut entry, batch);
        self.finish_batch(source, &mut entry, now);
        outcome
    }

    fn replace_entry(entry: &mut Entry, batch: Series) -> BatchOutcome {
        let rows = batch.len();
        entry.series = Arc::new(batch);
        BatchOutcome::Replaced(rows)
    }

    fn finish_batch(&self, source: Source, entry: &mut Entry, now: f64) {
        entry.bump_next_index();
        if let Some(cutoff) = self.config.policy(source).cutoff(now) {
            Self::trim_entry(entry, cutoff);
        }
    }

    /// Drops the oldest rows with `timestamp < now - retention_secs`.
    ///
    /// Returns the number of rows removed. May leave the series empty.
    pub fn trim(&self, source: Source, retention_secs: f64, now: f64) -> usize {
        let mut entry = self.write(source);
        Self::trim_entry(&mut entry, now - retention_secs)
    }

    fn trim_entry(entry: &mut Entry, cutoff: f64) -> usize {
        if entry.series.count_before(cutoff) == 0 {
            return 0;
        }
        Arc::make_mut(&mut entry.series).drain_before(cutoff)
    }

    /// Returns a consistent snapshot of the stored series.
    pub fn latest_raw(&self, source: Source) -> Arc<Series> {
        let entry = self.entries[source.slot()]
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&entry.series)
    }

    /// Number of rows stored for `source`.
    pub fn len(&self, source: Source) -> usize {
        self.latest_raw(source).len()
    }

    /// Returns `true` if no source holds any rows.
    pub fn is_empty(&self) -> bool {
        Source::ALL.iter().all(|&source| self.len(source) == 0)
    }
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
