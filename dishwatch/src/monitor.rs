//! The read side: merged, windowed and downsampled views of the store.

use std::sync::Arc;

use serde::Serialize;

use crate::collect::AddressResolver;
use crate::downsample::downsample;
use crate::error::Result;
use crate::merge::merge_since;
use crate::series::Series;
use crate::settings::SettingsFile;
use crate::store::{SeriesStore, Source, unix_now};

/// One dashboard update.
///
/// Serializes as
/// `{"starlink": {...}, "status": {...}, "speedtest": {...}, "ip_local": "..."}`
/// with every series column-oriented.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// History merged with newer status rows, windowed and downsampled.
    pub starlink: Series,
    /// Status rows, windowed and downsampled.
    pub status: Series,
    /// Speedtest results, downsampled but not windowed.
    pub speedtest: Series,
    /// This host's address on the dish network.
    pub ip_local: Option<String>,
}

/// Computes [`Snapshot`]s from a shared store.
pub struct Monitor {
    store: Arc<SeriesStore>,
    settings: Arc<SettingsFile>,
    resolver: Box<dyn AddressResolver>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Creates a monitor over `store`.
    pub fn new(
        store: Arc<SeriesStore>,
        settings: Arc<SettingsFile>,
        resolver: impl AddressResolver + 'static,
    ) -> Self {
        Self {
            store,
            settings,
            resolver: Box::new(resolver),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    /// The shared settings.
    pub fn settings(&self) -> &Arc<SettingsFile> {
        &self.settings
    }

    /// Returns the latest view over the last `retention_secs` seconds with at
    /// most `max_points` points per series.
    ///
    /// Read-only: the store is never modified.
    ///
    /// # Errors
    ///
    /// Returns [`DownsampleError`](crate::error::DownsampleError) if
    /// `max_points` is not positive.
    pub fn latest(&self, retention_secs: u64, max_points: i64) -> Result<Snapshot> {
        self.latest_at(retention_secs, max_points, unix_now())
    }

    /// Same as [`Monitor::latest`], using the persisted `history_secs` and
    /// `max_data_points`.
    ///
    /// # Errors
    ///
    /// See [`Monitor::latest`].
    pub fn latest_with_settings(&self) -> Result<Snapshot> {
        let settings = self.settings.get();
        self.latest(settings.history_secs, settings.max_points())
    }

    /// Same as [`Monitor::latest`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Monitor::latest`].
    #[allow(clippy::cast_precision_loss)] // Retention windows are far below 2^52 seconds
    pub fn latest_at(&self, retention_secs: u64, max_points: i64, now: f64) -> Result<Snapshot> {
        let cutoff = now - retention_secs as f64;

        let history = self.store.latest_raw(Source::History);
        let status = self.store.latest_raw(Source::Status);
        let speedtest = self.store.latest_raw(Source::Speedtest);

        let starlink = merge_since(&history, &status, cutoff);

        Ok(Snapshot {
            starlink: downsample(&starlink, max_points)?,
            status: downsample(&status.since(cutoff), max_points)?,
            speedtest: downsample(&speedtest, max_points)?,
            ip_local: self.resolver.local_ip(),
        })
    }
}
