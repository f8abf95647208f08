//! Column-oriented time series.
//!
//! A [`Series`] stores one column per field plus the two mandatory columns
//! `index` and `timestamp`. Every column always has the same length as the
//! series; rows that lack a field hold [`Value::Null`] in that column, and a
//! field that first appears on a later row is back-filled with nulls. This
//! makes the schema the union of every field ever pushed.
//!
//! # Layout
//!
//! ```text
//! index      │ 41    42    43    44
//! timestamp  │ 100.0 101.0 102.0 103.0
//! snr        │ 9.0   8.5   null  9.0
//! obstructed │ false false true  false
//! ```
//!
//! Serialization follows the same layout:
//! `{"index": [...], "timestamp": [...], "snr": [...], ...}`, which is what
//! dashboard clients zip positionally.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::value::{Fields, Row, Value};

/// Name of the index column.
pub const INDEX_FIELD: &str = "index";

/// Name of the timestamp column.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Returns `true` for the names of the two mandatory columns.
pub fn is_reserved_field(name: &str) -> bool {
    name == INDEX_FIELD || name == TIMESTAMP_FIELD
}

/// An ordered, column-oriented sequence of rows.
///
/// Invariant: `index` and `timestamp` are non-decreasing across row order.
/// Callers that push rows are responsible for upholding it; the
/// [`SeriesStore`](crate::store::SeriesStore) does so on every append.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    index: Vec<u64>,
    timestamp: Vec<f64>,
    columns: BTreeMap<String, Vec<Value>>,
}

impl Series {
    /// Creates an empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from rows, numbering rows that carry no index with the
    /// previous index plus one (starting at 0).
    pub fn from_rows<I: IntoIterator<Item = Row>>(rows: I) -> Self {
        let mut series = Self::new();
        for row in rows {
            let index = row
                .index
                .unwrap_or_else(|| series.last_index().map_or(0, |i| i + 1));
            series.push(index, row.timestamp, row.fields);
        }
        series
    }

    /// Builds a series from prepared columns.
    ///
    /// All columns must have the same length as `index`.
    pub(crate) fn from_columns(
        index: Vec<u64>,
        timestamp: Vec<f64>,
        columns: BTreeMap<String, Vec<Value>>,
    ) -> Self {
        debug_assert_eq!(index.len(), timestamp.len());
        debug_assert!(columns.values().all(|c| c.len() == index.len()));
        Self {
            index,
            timestamp,
            columns,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the series holds no rows.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The index column.
    pub fn indices(&self) -> &[u64] {
        &self.index
    }

    /// The timestamp column, in seconds since the Unix epoch.
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamp
    }

    /// Returns a field column, or `None` if the field was never seen.
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Iterates over field names in sorted order (excluding `index` and
    /// `timestamp`).
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Iterates over `(name, column)` pairs in field-name order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Index of the oldest row.
    pub fn first_index(&self) -> Option<u64> {
        self.index.first().copied()
    }

    /// Index of the newest row.
    pub fn last_index(&self) -> Option<u64> {
        self.index.last().copied()
    }

    /// Timestamp of the newest row.
    pub fn last_timestamp(&self) -> Option<f64> {
        self.timestamp.last().copied()
    }

    /// Returns the value of `field` at row `position`; absent fields and
    /// out-of-range positions read as null.
    pub fn value(&self, position: usize, field: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.columns
            .get(field)
            .and_then(|column| column.get(position))
            .unwrap_or(NULL)
    }

    /// Returns the newest non-null value of `field`.
    pub fn latest_value(&self, field: &str) -> Option<&Value> {
        self.columns
            .get(field)?
            .iter()
            .rev()
            .find(|value| !value.is_null())
    }

    /// Materializes the row at `position`. Null fields are omitted.
    pub fn row(&self, position: usize) -> Option<Row> {
        if position >= self.len() {
            return None;
        }
        let fields = self
            .columns
            .iter()
            .filter(|(_, column)| !column[position].is_null())
            .map(|(name, column)| (name.clone(), column[position].clone()))
            .collect();
        Some(Row {
            index: Some(self.index[position]),
            timestamp: self.timestamp[position],
            fields,
        })
    }

    /// Finds the row position holding `index`.
    pub fn position_of(&self, index: u64) -> Option<usize> {
        self.index.binary_search(&index).ok()
    }

    /// Returns `true` if a row with `index` is present.
    pub fn contains_index(&self, index: u64) -> bool {
        self.position_of(index).is_some()
    }

    /// Appends one row.
    ///
    /// Fields named `index` or `timestamp` are ignored; they are carried by
    /// the dedicated columns.
    pub fn push(&mut self, index: u64, timestamp: f64, mut fields: Fields) {
        let len = self.len();

        for (name, column) in &mut self.columns {
            column.push(fields.remove(name).unwrap_or_default());
        }

        for (name, value) in fields {
            if is_reserved_field(&name) {
                continue;
            }
            let mut column = vec![Value::Null; len];
            column.push(value);
            self.columns.insert(name, column);
        }

        self.index.push(index);
        self.timestamp.push(timestamp);
    }

    /// Adds an all-null column named `name` if it is missing.
    pub(crate) fn ensure_column(&mut self, name: &str) {
        if !is_reserved_field(name) && !self.columns.contains_key(name) {
            self.columns.insert(name.to_string(), vec![Value::Null; self.len()]);
        }
    }

    /// Appends the rows of `other` from position `from` onward, keeping their
    /// indices. Columns are unioned.
    pub fn extend_from(&mut self, other: &Series, from: usize) {
        let from = from.min(other.len());
        let added = other.len() - from;
        if added == 0 {
            return;
        }
        let len = self.len();

        for (name, column) in &mut self.columns {
            match other.columns.get(name) {
                Some(source) => column.extend_from_slice(&source[from..]),
                None => column.resize(len + added, Value::Null),
            }
        }

        for (name, source) in &other.columns {
            if !self.columns.contains_key(name) {
                let mut column = vec![Value::Null; len];
                column.extend_from_slice(&source[from..]);
                self.columns.insert(name.clone(), column);
            }
        }

        self.index.extend_from_slice(&other.index[from..]);
        self.timestamp.extend_from_slice(&other.timestamp[from..]);
    }

    /// Number of leading rows with `timestamp < cutoff`.
    pub fn count_before(&self, cutoff: f64) -> usize {
        self.timestamp.partition_point(|&ts| ts < cutoff)
    }

    /// Removes the oldest rows with `timestamp < cutoff` and returns how many
    /// were removed. Columns that become all-null keep their name.
    pub fn drain_before(&mut self, cutoff: f64) -> usize {
        let count = self.count_before(cutoff);
        if count > 0 {
            self.index.drain(..count);
            self.timestamp.drain(..count);
            for column in self.columns.values_mut() {
                column.drain(..count);
            }
        }
        count
    }

    /// Copies the rows with `timestamp >= cutoff`.
    pub fn since(&self, cutoff: f64) -> Series {
        self.slice(self.count_before(cutoff)..self.len())
    }

    /// Copies a contiguous range of rows.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Series {
        Series {
            index: self.index[range.clone()].to_vec(),
            timestamp: self.timestamp[range.clone()].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column[range.clone()].to_vec()))
                .collect(),
        }
    }
}

impl Serialize for Series {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len() + 2))?;
        map.serialize_entry(INDEX_FIELD, &self.index)?;
        map.serialize_entry(TIMESTAMP_FIELD, &self.timestamp)?;
        for (name, column) in &self.columns {
            map.serialize_entry(name, column)?;
        }
        map.end()
    }
}
