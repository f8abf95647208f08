//! # dishwatch
//!
//! Telemetry retention, merge and downsampling engine for a Starlink dish.
//!
//! dishwatch polls the dish's status and ring-buffered history, runs periodic
//! bandwidth tests, keeps a bounded in-memory history of all three, and
//! produces downsampled dashboard snapshots on demand.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Ring-buffer unrolling with an uptime cross-check on the write cursor
//! - Union-of-schema rows: fields may come and go between firmware versions
//! - Readers get immutable `Arc` snapshots and never see a partial append
//! - Stride-aligned downsampling that stays stable as the window slides
//! - No persistence: everything starts empty at process start
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dishwatch::collect::AddressResolver;
//! use dishwatch::{Monitor, Row, SeriesStore, Settings, SettingsFile, Source, StoreConfig};
//!
//! struct NoAddress;
//!
//! impl AddressResolver for NoAddress {
//!     fn local_ip(&self) -> Option<String> {
//!         None
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SeriesStore::new(StoreConfig::default()));
//! let settings = Arc::new(SettingsFile::in_memory(Settings::default()));
//!
//! // Normally the poller appends; here we append by hand.
//! for t in 0u32..10 {
//!     let ts = 1_700_000_000.0 + f64::from(t);
//!     store.append(Source::Status, Row::new(ts).with_field("snr", 9.0), ts);
//! }
//!
//! let monitor = Monitor::new(Arc::clone(&store), settings, NoAddress);
//! let snapshot = monitor.latest_at(600, 5, 1_700_000_010.0)?;
//! assert_eq!(snapshot.status.len(), 5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Poller ──► SeriesStore ──► merge / downsample ──► Monitor ──► Broadcaster / API
//! ```
//!
//! - [`Poller`] — Periodic fetch tasks feeding the store
//! - [`SeriesStore`] — Per-source, retention-bounded series
//! - [`Monitor`] — Merged, windowed, downsampled [`Snapshot`]s
//! - [`Broadcaster`] — The single periodic push loop
//!
//! ## Modules
//!
//! - [`value`] — Field values and rows
//! - [`series`] — Column-oriented series
//! - [`unroll`] — Ring-buffer linearization
//! - [`store`] — Series storage and retention
//! - [`merge`] — History/status merge
//! - [`downsample`] — Stride-aligned downsampling
//! - [`schedule`] — Cancellable periodic tasks
//! - [`collect`] — Dish, speedtest and address collaborators
//! - [`poller`] — Background polling
//! - [`monitor`] — Snapshot computation
//! - [`obstruction`] — Sky obstruction map
//! - [`broadcast`] — Snapshot push loop
//! - [`settings`] — Persisted settings
//! - [`error`] — Error types

pub mod broadcast;
pub mod collect;
pub mod downsample;
pub mod error;
pub mod merge;
pub mod monitor;
pub mod obstruction;
pub mod poller;
pub mod schedule;
pub mod series;
pub mod settings;
pub mod store;
pub mod unroll;
pub mod value;

// Re-export primary API types at crate root for convenience.
pub use broadcast::Broadcaster;
pub use downsample::downsample;
pub use error::{DishwatchError, Result};
pub use merge::{merge, merge_since};
pub use monitor::{Monitor, Snapshot};
pub use obstruction::ObstructionMap;
pub use poller::{Poller, PollerConfig, SpeedtestOutcome};
pub use series::Series;
pub use settings::{Settings, SettingsFile};
pub use store::{RetentionPolicy, SeriesStore, Source, StoreConfig};
pub use unroll::{HistorySnapshot, unroll};
pub use value::{Row, Value};
