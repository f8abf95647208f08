//! Persisted dashboard settings.
//!
//! Settings live in a small TOML file that is created with defaults on first
//! start:
//!
//! ```toml
//! [settings]
//! history_secs = 600
//! max_data_points = 200
//! speedtest_enabled = true
//! ```
//!
//! Missing keys fall back to their defaults. The only runtime mutation is
//! [`SettingsFile::toggle_speedtest`], which writes the file back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SettingsError};

/// Default retention window shown by the dashboard, in seconds.
pub const DEFAULT_HISTORY_SECS: u64 = 600;

/// Default upper bound on points per pushed series.
pub const DEFAULT_MAX_DATA_POINTS: u64 = 200;

/// User-facing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether the scheduled speedtest runs.
    pub speedtest_enabled: bool,
    /// Upper bound on points per pushed series.
    pub max_data_points: u64,
    /// Retention window shown by the dashboard, in seconds.
    pub history_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speedtest_enabled: true,
            max_data_points: DEFAULT_MAX_DATA_POINTS,
            history_secs: DEFAULT_HISTORY_SECS,
        }
    }
}

impl Settings {
    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] if `max_data_points` or
    /// `history_secs` is zero or too large to be used as a signed count.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("max_data_points", self.max_data_points),
            ("history_secs", self.history_secs),
        ] {
            if value == 0 || i64::try_from(value).is_err() {
                return Err(SettingsError::Invalid {
                    key,
                    reason: format!("must be between 1 and {}, got {value}", i64::MAX),
                }
                .into());
            }
        }
        Ok(())
    }

    /// `max_data_points` as the signed budget taken by the downsampler.
    pub fn max_points(&self) -> i64 {
        i64::try_from(self.max_data_points).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    settings: Settings,
}

/// Settings shared between the poller and the request handlers, optionally
/// backed by a file.
#[derive(Debug)]
pub struct SettingsFile {
    path: Option<PathBuf>,
    current: RwLock<Settings>,
}

impl SettingsFile {
    /// Loads settings from `path`, creating the file with defaults if it does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if the file cannot be read, parsed or
    /// created, or holds invalid values.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let settings = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| SettingsError::Read {
                path: path.clone(),
                source: e,
            })?;
            let document: SettingsDocument =
                toml::from_str(&content).map_err(|e| SettingsError::Parse {
                    path: path.clone(),
                    source: e,
                })?;
            document.settings.validate()?;
            tracing::info!(path = %path.display(), "loaded settings");
            document.settings
        } else {
            let settings = Settings::default();
            write_settings(&path, settings)?;
            tracing::info!(path = %path.display(), "created settings file with defaults");
            settings
        };

        Ok(Self {
            path: Some(path),
            current: RwLock::new(settings),
        })
    }

    /// Settings that are never written to disk.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
        }
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the current settings.
    pub fn get(&self) -> Settings {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flips `speedtest_enabled`, persists it and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if the file cannot be written. The
    /// in-memory value is left unchanged in that case.
    pub fn toggle_speedtest(&self) -> Result<bool> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let updated = Settings {
            speedtest_enabled: !current.speedtest_enabled,
            ..*current
        };

        if let Some(path) = &self.path {
            write_settings(path, updated)?;
        }
        *current = updated;

        tracing::info!(enabled = updated.speedtest_enabled, "toggled speedtest");
        Ok(updated.speedtest_enabled)
    }
}

fn write_settings(path: &Path, settings: Settings) -> Result<()> {
    let content = toml::to_string(&SettingsDocument { settings })
        .map_err(|e| SettingsError::Serialize { source: e })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SettingsError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(path, content).map_err(|e| SettingsError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}
