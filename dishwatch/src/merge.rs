//! Merging of the history and status sources.
//!
//! History arrives every few tens of seconds as a complete ring-buffer
//! window; status arrives every second but carries a different field set.
//! The merged view takes history as the base and extends it with every status
//! row newer than the last history row, so the newest seconds are visible
//! before the next history fetch lands.
//!
//! ```text
//! history ts: 100 101 102
//! status  ts:     101 102 103 104
//! merged  ts: 100 101 102 103 104
//!                         ^^^^^^^ from status
//! ```

use crate::series::Series;

/// Combines `history` with the status rows that are newer than it.
///
/// Columns are unioned: status-only fields read as null on history rows and
/// history-only fields read as null on appended status rows. Appended rows
/// get indices continuing after the last history index; their status-side
/// indices are not carried over.
///
/// An empty `history`, or a `status` with nothing newer than `history`,
/// returns `history` unchanged.
pub fn merge(history: &Series, status: &Series) -> Series {
    merge_since(history, status, f64::NEG_INFINITY)
}

/// Same as `merge(history, status).since(cutoff)`, without copying the
/// history rows older than `cutoff`.
///
/// The merge point and the index numbering still come from the full
/// history, so the result does not depend on where the window starts.
pub fn merge_since(history: &Series, status: &Series, cutoff: f64) -> Series {
    let mut merged = history.since(cutoff);
    let (Some(t_last), Some(last_index)) = (history.last_timestamp(), history.last_index()) else {
        return merged;
    };

    let from = status.timestamps().partition_point(|&ts| ts <= t_last);
    if from == status.len() {
        return merged;
    }

    // Newer status rows that fall before the window still number and name
    // their columns as if they had been merged.
    let first = from.max(status.count_before(cutoff));
    if first > from {
        for (name, column) in status.columns() {
            if column[from..first].iter().any(|value| !value.is_null()) {
                merged.ensure_column(name);
            }
        }
    }

    let mut next_index = last_index + 1 + (first - from) as u64;
    for position in first..status.len() {
        if let Some(row) = status.row(position) {
            merged.push(next_index, row.timestamp, row.fields);
            next_index += 1;
        }
    }

    tracing::trace!(
        history_rows = history.len(),
        window_rows = merged.len(),
        appended = status.len() - first,
        "merged status into history"
    );

    merged
}
