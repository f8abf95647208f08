//! The dish's sky obstruction map.
//!
//! `dish_get_obstruction_map` returns a `numRows x numCols` grid of
//! normalized signal quality, flattened row-major into `snr`. Cells the dish
//! has not observed yet hold `-1`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{FetchError, Result, SnapshotError};
use crate::value::Value;

/// A decoded obstruction map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObstructionMap {
    /// Grid height.
    pub num_rows: usize,
    /// Grid width.
    pub num_cols: usize,
    /// Row-major cell quality in `0.0..=1.0`; `None` where unobserved.
    pub snr: Vec<Option<f64>>,
    /// Remaining scalar members (`minElevationDeg`, `referenceFrame`, ...).
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl ObstructionMap {
    /// Parses the body of a `dishGetObstructionMap` response.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::MissingField`] if a dimension or `snr` is
    /// absent, and [`SnapshotError::Malformed`] if `snr` does not hold
    /// `numRows * numCols` numbers.
    pub fn from_json(body: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut num_rows = None;
        let mut num_cols = None;
        let mut snr = None;
        let mut metadata = BTreeMap::new();

        for (name, value) in body {
            match name.as_str() {
                "numRows" => num_rows = dimension(&value),
                "numCols" => num_cols = dimension(&value),
                "snr" => snr = Some(value),
                _ => {
                    let value = Value::from_json(value);
                    if !matches!(value, Value::Structured(_)) {
                        metadata.insert(name, value);
                    }
                }
            }
        }

        let missing = |field| FetchError::MissingField {
            what: "obstruction map",
            field,
        };
        let num_rows = num_rows.ok_or_else(|| missing("numRows"))?;
        let num_cols = num_cols.ok_or_else(|| missing("numCols"))?;
        let Some(serde_json::Value::Array(cells)) = snr else {
            return Err(missing("snr").into());
        };

        let expected = num_rows.saturating_mul(num_cols);
        if cells.len() != expected {
            return Err(SnapshotError::Malformed {
                field: "snr".to_string(),
                expected,
                found: cells.len(),
            }
            .into());
        }

        let snr = cells
            .iter()
            .map(|cell| cell.as_f64().filter(|v| *v >= 0.0))
            .collect();

        Ok(Self {
            num_rows,
            num_cols,
            snr,
            metadata,
        })
    }

    /// Quality of the cell at (`row`, `col`), if observed.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.num_rows || col >= self.num_cols {
            return None;
        }
        self.snr[row * self.num_cols + col]
    }

    /// Iterates the grid one row at a time.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<f64>]> {
        self.snr.chunks(self.num_cols.max(1))
    }

    /// Fraction of cells observed so far.
    #[allow(clippy::cast_precision_loss)] // grid sizes are small
    pub fn coverage(&self) -> f64 {
        if self.snr.is_empty() {
            return 0.0;
        }
        self.snr.iter().filter(|cell| cell.is_some()).count() as f64 / self.snr.len() as f64
    }
}

fn dimension(value: &serde_json::Value) -> Option<usize> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }?;
    usize::try_from(n).ok()
}
