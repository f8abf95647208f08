//! Ring buffer unrolling for device history snapshots.
//!
//! The dish keeps its recent history in a set of parallel fixed-length
//! circular arrays (one per metric) plus a cursor, `current`, that counts every
//! write ever made. Slot `current % len` is the next slot to be overwritten.
//! This module linearizes those arrays into a chronologically ordered
//! [`Series`].
//!
//! # Slot mapping
//!
//! With `filled` valid samples, output position `i` reads slot
//! `(current - filled + i) % len`:
//!
//! ```text
//! len = 5, current = 7, filled = 5
//!
//! slot:     0  1  2  3  4
//! write #:  6  7  3  4  5      (oldest = slot 2, newest = slot 1)
//! output:   [2, 3, 4, 0, 1]
//! ```
//!
//! # Reconstructed index and timestamp
//!
//! The device reports neither per-sample indices nor timestamps. Output row
//! `i` is assigned `index = current - filled + 1 + i` and
//! `timestamp = now - (filled - i - 1)`, assuming one sample per second.
//! Both are best-effort reconstructions: a delayed fetch shifts every
//! timestamp by the delay, and a cursor reset makes indices restart.
//!
//! # Valid sample count
//!
//! `filled = min(current, len)`, additionally capped by the device uptime in
//! seconds when it is known. The uptime cap protects against a cursor that
//! survived a reboot while the buffer contents did not.

use std::collections::BTreeMap;

use crate::error::{FetchError, Result, SnapshotError};
use crate::series::Series;
use crate::value::Value;

/// Name of the cursor member in a `get_history` response.
const CURSOR_FIELD: &str = "current";

/// A device-reported set of parallel circular arrays plus write cursor.
///
/// Only exists for one fetch-and-unroll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    /// Total number of writes ever made to the ring.
    pub current: u64,
    /// Ring arrays by field name. All arrays must share one length.
    pub arrays: BTreeMap<String, Vec<Value>>,
}

impl HistorySnapshot {
    /// Creates a snapshot with no arrays.
    pub fn new(current: u64) -> Self {
        Self {
            current,
            arrays: BTreeMap::new(),
        }
    }

    /// Adds a ring array.
    #[must_use]
    pub fn with_array(mut self, name: &str, values: Vec<Value>) -> Self {
        self.arrays.insert(name.to_string(), values);
        self
    }

    /// Parses the body of a `dishGetHistory` response.
    ///
    /// Non-empty arrays of scalars become ring arrays; `current` is the cursor
    /// (the device encodes it as a string). Everything else is metadata and is
    /// ignored, including arrays of objects such as the `outages` event list.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::MissingField`] if `current` is absent and
    /// [`SnapshotError::InvalidCursor`] if it is not an unsigned integer.
    pub fn from_json(body: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut current = None;
        let mut arrays = BTreeMap::new();

        for (name, value) in body {
            match value {
                serde_json::Value::Array(items) if is_ring_array(&items) => {
                    arrays.insert(name, items.into_iter().map(Value::from_json).collect());
                }
                serde_json::Value::Array(_) => {
                    tracing::trace!(field = %name, "skipping non-ring history member");
                }
                other if name == CURSOR_FIELD => current = Some(parse_cursor(&other)?),
                _ => {}
            }
        }

        let current = current.ok_or(FetchError::MissingField {
            what: "history",
            field: CURSOR_FIELD,
        })?;

        Ok(Self { current, arrays })
    }

    /// Returns the common length of all ring arrays (0 if there are none).
    ///
    /// The reference length is the one shared by the most arrays (the longer
    /// one on a tie), so the error names the array that is out of line.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Malformed`] if the arrays disagree.
    pub fn buffer_len(&self) -> Result<usize> {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for values in self.arrays.values() {
            *counts.entry(values.len()).or_default() += 1;
        }
        let Some(expected) = counts
            .iter()
            .max_by_key(|&(len, count)| (*count, *len))
            .map(|(len, _)| *len)
        else {
            return Ok(0);
        };

        if let Some((name, values)) = self.arrays.iter().find(|(_, v)| v.len() != expected) {
            return Err(SnapshotError::Malformed {
                field: name.clone(),
                expected,
                found: values.len(),
            }
            .into());
        }

        Ok(expected)
    }
}

/// A ring column is a non-empty array of scalars.
fn is_ring_array(items: &[serde_json::Value]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| !matches!(item, serde_json::Value::Array(_) | serde_json::Value::Object(_)))
}

fn parse_cursor(value: &serde_json::Value) -> Result<u64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        SnapshotError::InvalidCursor {
            reason: format!("expected an unsigned integer, found {value}"),
        }
        .into()
    })
}

/// Number of valid samples in a ring of `buffer_len` slots.
///
/// `min(current, buffer_len)`, further capped by `uptime_secs` when known.
#[allow(clippy::cast_possible_truncation)] // Result is bounded by buffer_len (usize)
pub fn filled_count(current: u64, buffer_len: usize, uptime_secs: Option<u64>) -> usize {
    let mut filled = current.min(buffer_len as u64);
    if let Some(uptime) = uptime_secs {
        filled = filled.min(uptime);
    }
    filled as usize
}

/// Maps output position `position` to its ring slot.
#[inline]
#[allow(clippy::cast_possible_truncation)] // Result is bounded by buffer_len (usize)
pub fn slot_for(current: u64, filled: usize, buffer_len: usize, position: usize) -> usize {
    let start = current - filled as u64;
    ((start + position as u64) % buffer_len as u64) as usize
}

/// Linearizes a snapshot into a chronologically ordered series.
///
/// Every ring array becomes a column of length `filled`, oldest first. Rows
/// carry reconstructed indices and timestamps (see the module docs); they are
/// not device-supplied values.
///
/// # Arguments
///
/// * `snapshot` - The fetched ring arrays and cursor
/// * `uptime_secs` - Device uptime, if known, used to cap `filled`
/// * `now` - Wall-clock time assigned to the newest sample
///
/// # Errors
///
/// Returns [`SnapshotError::Malformed`] if the arrays have mismatched
/// lengths. Nothing is unrolled in that case.
#[allow(clippy::cast_precision_loss)] // filled is a ring size, far below 2^52
pub fn unroll(snapshot: &HistorySnapshot, uptime_secs: Option<u64>, now: f64) -> Result<Series> {
    let buffer_len = snapshot.buffer_len()?;
    let filled = filled_count(snapshot.current, buffer_len, uptime_secs);

    if filled == 0 {
        return Ok(Series::new());
    }

    let first_index = snapshot.current - filled as u64 + 1;
    let index: Vec<u64> = (0..filled as u64).map(|i| first_index + i).collect();
    let timestamp: Vec<f64> = (0..filled)
        .map(|i| now - (filled - i - 1) as f64)
        .collect();

    let columns = snapshot
        .arrays
        .iter()
        .map(|(name, ring)| {
            let linear = (0..filled)
                .map(|i| ring[slot_for(snapshot.current, filled, buffer_len, i)].clone())
                .collect();
            (name.clone(), linear)
        })
        .collect();

    Ok(Series::from_columns(index, timestamp, columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DishwatchError;
    use serde_json::json;

    fn ring(values: &[f64]) -> Vec<Value> {
        values.iter().copied().map(Value::Number).collect()
    }

    fn numbers(series: &Series, field: &str) -> Vec<f64> {
        series
            .column(field)
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect()
    }

    #[test]
    fn test_unroll_partially_filled() {
        // 3 writes into a 5-slot ring: slots 0..3 are valid, no wrap.
        let snapshot = HistorySnapshot::new(3).with_array("snr", ring(&[1.0, 2.0, 3.0, 0.0, 0.0]));

        let series = unroll(&snapshot, None, 1000.0).unwrap();

        assert_eq!(numbers(&series, "snr"), vec![1.0, 2.0, 3.0]);
        assert_eq!(series.indices(), &[1, 2, 3]);
        assert_eq!(series.timestamps(), &[998.0, 999.0, 1000.0]);
    }

    #[test]
    fn test_unroll_wrapped() {
        // 7 writes into 5 slots: writes 6 and 7 overwrote slots 0 and 1.
        let snapshot = HistorySnapshot::new(7).with_array("v", ring(&[6.0, 7.0, 3.0, 4.0, 5.0]));

        let series = unroll(&snapshot, None, 50.0).unwrap();

        assert_eq!(numbers(&series, "v"), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(series.indices(), &[3, 4, 5, 6, 7]);
        assert_eq!(series.timestamps(), &[46.0, 47.0, 48.0, 49.0, 50.0]);
    }

    #[test]
    fn test_unroll_uptime_caps_filled() {
        // Cursor says the ring is full, but the dish has only been up 2s.
        let snapshot = HistorySnapshot::new(12).with_array("v", ring(&[10.0, 11.0, 12.0, 8.0, 9.0]));

        let series = unroll(&snapshot, Some(2), 10.0).unwrap();

        assert_eq!(numbers(&series, "v"), vec![11.0, 12.0]);
        assert_eq!(series.indices(), &[11, 12]);
    }

    #[test]
    fn test_unroll_empty_cursor() {
        let snapshot = HistorySnapshot::new(0).with_array("v", ring(&[0.0; 4]));
        let series = unroll(&snapshot, Some(100), 10.0).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_unroll_no_arrays() {
        let series = unroll(&HistorySnapshot::new(42), None, 10.0).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_unroll_rejects_mismatched_lengths() {
        let snapshot = HistorySnapshot::new(3)
            .with_array("a", ring(&[1.0, 2.0, 3.0]))
            .with_array("b", ring(&[1.0, 2.0]));

        let err = unroll(&snapshot, None, 10.0).unwrap_err();
        assert!(matches!(
            err,
            DishwatchError::Snapshot(SnapshotError::Malformed {
                expected: 3,
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_mismatch_names_outlier() {
        let snapshot = HistorySnapshot::new(4)
            .with_array("a", ring(&[1.0, 2.0, 3.0, 4.0]))
            .with_array("b", ring(&[1.0]))
            .with_array("c", ring(&[1.0, 2.0, 3.0, 4.0]));

        let err = snapshot.buffer_len().unwrap_err();
        match err {
            DishwatchError::Snapshot(SnapshotError::Malformed {
                field,
                expected,
                found,
            }) => {
                assert_eq!(field, "b");
                assert_eq!(expected, 4);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_json_skips_structured_arrays() {
        let body = json!({
            "current": "6",
            "snr": [9, 9, 8],
            "outages": [{"cause": "NO_SCHEDULE", "startTimestampNs": "1", "duration": "2"}],
            "nested": [[1, 2], [3, 4], [5, 6]],
            "emptyList": []
        });
        let serde_json::Value::Object(body) = body else {
            unreachable!()
        };

        let snapshot = HistorySnapshot::from_json(body).unwrap();

        assert_eq!(snapshot.arrays.keys().collect::<Vec<_>>(), vec!["snr"]);
        assert_eq!(snapshot.buffer_len().unwrap(), 3);
    }

    #[test]
    fn test_reroll_reconstructs_ring() {
        for buffer_len in 1usize..8 {
            for current in 0u64..20 {
                for uptime in [None, Some(0), Some(1), Some(3), Some(100)] {
                    let original: Vec<f64> = (0..buffer_len).map(|s| s as f64 * 1.5).collect();
                    let snapshot = HistorySnapshot::new(current).with_array("v", ring(&original));

                    let series = unroll(&snapshot, uptime, 0.0).unwrap();
                    let filled = filled_count(current, buffer_len, uptime);
                    assert_eq!(series.len(), filled);

                    // Inverse mapping: put every output back into its slot.
                    let mut rerolled = vec![None; buffer_len];
                    for (i, value) in numbers(&series, "v").into_iter().enumerate() {
                        rerolled[slot_for(current, filled, buffer_len, i)] = Some(value);
                    }

                    for (slot, value) in rerolled.iter().enumerate() {
                        if let Some(value) = value {
                            assert_eq!(*value, original[slot]);
                        }
                    }
                    assert_eq!(rerolled.iter().flatten().count(), filled);
                }
            }
        }
    }

    #[test]
    fn test_from_json_parses_string_cursor() {
        let body = json!({
            "current": "1234",
            "popPingDropRate": [0.0, 1.0],
            "snr": [9.0, 9.0],
            "someScalar": 5
        });
        let serde_json::Value::Object(body) = body else {
            unreachable!()
        };

        let snapshot = HistorySnapshot::from_json(body).unwrap();

        assert_eq!(snapshot.current, 1234);
        assert_eq!(snapshot.arrays.len(), 2);
        assert_eq!(snapshot.buffer_len().unwrap(), 2);
    }

    #[test]
    fn test_from_json_missing_cursor() {
        let serde_json::Value::Object(body) = json!({ "snr": [1.0] }) else {
            unreachable!()
        };
        assert!(matches!(
            HistorySnapshot::from_json(body),
            Err(DishwatchError::Fetch(FetchError::MissingField { field: "current", .. }))
        ));
    }

    #[test]
    fn test_from_json_invalid_cursor() {
        let serde_json::Value::Object(body) = json!({ "current": "-3", "snr": [1.0] }) else {
            unreachable!()
        };
        assert!(matches!(
            HistorySnapshot::from_json(body),
            Err(DishwatchError::Snapshot(SnapshotError::InvalidCursor { .. }))
        ));
    }
}
