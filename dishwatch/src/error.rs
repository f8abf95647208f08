//! Error types for the dishwatch telemetry engine.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all dishwatch operations.
///
/// Empty series are never errors: an empty store, an empty merge result or an
/// empty downsampled view are all valid states.
#[derive(Error, Debug)]
pub enum DishwatchError {
    /// An external collaborator (dish, speedtest tool) failed.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A device history snapshot could not be unrolled.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Error loading or persisting the settings file.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Error during downsampling.
    #[error("downsample error: {0}")]
    Downsample(#[from] DownsampleError),
}

/// Errors raised by the subprocess-backed collaborators.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The helper program could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The helper program did not finish within its budget.
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout {
        /// The program that timed out.
        program: String,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The helper program exited unsuccessfully.
    #[error("'{program}' exited with status {status}: {stderr}")]
    ExitStatus {
        /// The program that failed.
        program: String,
        /// Exit code, or -1 when terminated by a signal.
        status: i32,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// The helper program produced output that is not valid JSON.
    #[error("failed to parse {what} response: {source}")]
    Parse {
        /// Which response was being parsed.
        what: &'static str,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The response parsed but lacks a required member.
    #[error("{what} response is missing '{field}'")]
    MissingField {
        /// Which response was being inspected.
        what: &'static str,
        /// The missing member.
        field: &'static str,
    },

    /// An HTTP request failed to complete.
    #[error("request to {url} failed: {source}")]
    Http {
        /// The requested URL.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// An HTTP endpoint returned a non-2xx status.
    #[error("{url} returned status {status}")]
    HttpStatus {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A lookup service answered with something that is not an IP address.
    #[error("{url} returned '{body}', not an IP address")]
    InvalidAddress {
        /// The requested URL.
        url: String,
        /// The trimmed response body.
        body: String,
    },
}

/// Errors that can occur while unrolling a device history snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Ring arrays disagree on their length; the snapshot is rejected whole.
    #[error("ring array '{field}' has length {found}, expected {expected}")]
    Malformed {
        /// The first field whose length disagrees.
        field: String,
        /// The length shared by the preceding arrays.
        expected: usize,
        /// The length of the offending array.
        found: usize,
    },

    /// The ring cursor is missing or not an unsigned integer.
    #[error("invalid ring cursor: {reason}")]
    InvalidCursor {
        /// Description of what was wrong with the cursor.
        reason: String,
    },
}

/// Errors that can occur when loading or saving the settings file.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings from '{}': {source}", path.display())]
    Read {
        /// The settings file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for the settings schema.
    #[error("failed to parse settings from '{}': {source}", path.display())]
    Parse {
        /// The settings file path.
        path: std::path::PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// The settings could not be serialized.
    #[error("failed to serialize settings: {source}")]
    Serialize {
        /// The underlying TOML error.
        #[source]
        source: toml::ser::Error,
    },

    /// The settings file could not be written.
    #[error("failed to write settings to '{}': {source}", path.display())]
    Write {
        /// The settings file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A setting holds a value outside its valid range.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// The offending key.
        key: &'static str,
        /// Why the value is invalid.
        reason: String,
    },
}

/// Errors that can occur during downsampling.
#[derive(Error, Debug)]
pub enum DownsampleError {
    /// The requested point budget is not positive.
    #[error("invalid max points {max_points} (must be > 0)")]
    InvalidMaxPoints {
        /// The rejected budget.
        max_points: i64,
    },
}

/// Type alias for `Result<T, DishwatchError>`.
pub type Result<T> = std::result::Result<T, DishwatchError>;
