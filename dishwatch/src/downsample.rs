//! Stride-aligned downsampling.
//!
//! Reduces a series of `M` rows to at most `max_points` rows for transport.
//! Each output sample averages a window around a stride boundary, and the
//! boundaries are aligned to absolute `index` values rather than to row
//! positions. Aligning to the index keeps the sampled points stable as the
//! series slides forward one row at a time, which is what prevents the
//! shimmering a dashboard would otherwise show between consecutive pushes.
//!
//! # Algorithm
//!
//! ```text
//! stride = ceil(M / max_points)              (stride <= 1: identity)
//! start  = (stride - first_index % stride) % stride
//!
//! for i in start, start + stride, ... < M:
//!     out = mean of non-null values in [i - stride, i + stride)
//! ```
//!
//! Windows overlap by one stride on each side, so each output is a centred
//! two-stride average. The `index` and `timestamp` columns are taken from row
//! `i` directly. A field holding anything other than numbers and nulls cannot
//! be averaged and is nearest-neighbour sampled at `i` instead.

use crate::error::{DownsampleError, Result};
use crate::series::Series;
use crate::value::Value;

/// Positions sampled by one downsampling pass.
///
/// The same plan applies to every column of a series, which is why all
/// downsampled columns share one length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownsamplePlan {
    /// Number of input rows.
    pub len: usize,
    /// Distance between sampled positions.
    pub stride: usize,
    /// First sampled position.
    pub start: usize,
}

impl DownsamplePlan {
    /// Plans the downsampling of `len` rows whose first index is
    /// `first_index`.
    ///
    /// # Errors
    ///
    /// Returns [`DownsampleError::InvalidMaxPoints`] if `max_points` is not
    /// positive.
    #[allow(clippy::cast_possible_truncation)] // start < stride, which is a usize
    pub fn new(len: usize, first_index: u64, max_points: i64) -> Result<Self> {
        if max_points <= 0 {
            return Err(DownsampleError::InvalidMaxPoints { max_points }.into());
        }
        let max_points = usize::try_from(max_points).unwrap_or(usize::MAX);

        let stride = len.div_ceil(max_points);
        let start = if stride > 1 {
            let stride = stride as u64;
            ((stride - first_index % stride) % stride) as usize
        } else {
            0
        };

        Ok(Self { len, stride, start })
    }

    /// Returns `true` if the plan keeps every row.
    pub fn is_identity(&self) -> bool {
        self.stride <= 1
    }

    /// Row positions that produce output samples.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        let step = self.stride.max(1);
        (self.start..self.len).step_by(step)
    }

    /// Number of output samples: `ceil((len - start) / stride)`.
    pub fn output_len(&self) -> usize {
        if self.is_identity() {
            return self.len;
        }
        (self.len - self.start).div_ceil(self.stride)
    }

    /// Downsamples a single column according to this plan.
    pub fn apply(&self, values: &[Value]) -> Vec<Value> {
        if self.is_identity() {
            return values.to_vec();
        }

        let numeric = values.iter().all(|v| v.is_null() || v.as_f64().is_some());
        if !numeric {
            return self
                .positions()
                .map(|i| values.get(i).cloned().unwrap_or_default())
                .collect();
        }

        self.positions()
            .map(|i| {
                let lo = i.saturating_sub(self.stride);
                let hi = (i + self.stride).min(values.len());
                window_mean(values.get(lo..hi).unwrap_or_default())
            })
            .collect()
    }
}

#[allow(clippy::cast_precision_loss)] // Window sizes are tiny
fn window_mean(window: &[Value]) -> Value {
    let (sum, count) = window
        .iter()
        .filter_map(Value::as_f64)
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        Value::Null
    } else {
        Value::Number(sum / count as f64)
    }
}

/// Reduces `series` to at most `max_points` rows.
///
/// Series of at most `max_points` rows, including empty ones, are returned
/// unchanged.
///
/// # Arguments
///
/// * `series` - The series to reduce
/// * `max_points` - Upper bound on output rows; must be positive
///
/// # Errors
///
/// Returns [`DownsampleError::InvalidMaxPoints`] if `max_points <= 0`.
///
/// # Examples
///
/// ```rust
/// use dishwatch::downsample::downsample;
/// use dishwatch::series::Series;
/// use dishwatch::value::{Row, Value};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let series = Series::from_rows(
///     (1u32..=10).map(|v| Row::new(f64::from(v)).with_field("v", f64::from(v))),
/// );
///
/// let reduced = downsample(&series, 5)?;
/// let values: Vec<_> = reduced.column("v").unwrap().iter().filter_map(Value::as_f64).collect();
/// assert_eq!(values, vec![1.5, 2.5, 4.5, 6.5, 8.5]);
/// # Ok(())
/// # }
/// ```
pub fn downsample(series: &Series, max_points: i64) -> Result<Series> {
    let plan = DownsamplePlan::new(
        series.len(),
        series.first_index().unwrap_or_default(),
        max_points,
    )?;

    if plan.is_identity() {
        return Ok(series.clone());
    }

    let index = plan.positions().map(|i| series.indices()[i]).collect();
    let timestamp = plan.positions().map(|i| series.timestamps()[i]).collect();
    let columns = series
        .columns()
        .map(|(name, values)| (name.to_string(), plan.apply(values)))
        .collect();

    tracing::trace!(
        rows = series.len(),
        stride = plan.stride,
        start = plan.start,
        output = plan.output_len(),
        "downsampled series"
    );

    Ok(Series::from_columns(index, timestamp, columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DishwatchError;
    use crate::value::Row;

    fn numbered(first_index: u64, values: &[f64]) -> Series {
        Series::from_rows(values.iter().enumerate().map(|(i, &v)| {
            Row::new(100.0 + v)
                .with_index(first_index + i as u64)
                .with_field("v", v)
        }))
    }

    fn column(series: &Series, field: &str) -> Vec<Value> {
        series.column(field).unwrap().to_vec()
    }

    #[test]
    fn test_stride_aligned_means() {
        let series = numbered(0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);

        let reduced = downsample(&series, 5).unwrap();

        assert_eq!(
            column(&reduced, "v"),
            [1.5, 2.5, 4.5, 6.5, 8.5].map(Value::Number).to_vec()
        );
        assert_eq!(reduced.indices(), &[0, 2, 4, 6, 8]);
        assert_eq!(reduced.timestamps(), &[101.0, 103.0, 105.0, 107.0, 109.0]);
    }

    #[test]
    fn test_windows_align_to_absolute_index() {
        // First index 1 with stride 2: the first boundary is at position 1.
        let plan = DownsamplePlan::new(10, 1, 5).unwrap();
        assert_eq!(plan.stride, 2);
        assert_eq!(plan.start, 1);
        assert_eq!(plan.positions().collect::<Vec<_>>(), vec![1, 3, 5, 7, 9]);

        // Already on a boundary.
        let plan = DownsamplePlan::new(10, 4, 5).unwrap();
        assert_eq!(plan.start, 0);

        let plan = DownsamplePlan::new(9, 7, 3).unwrap();
        assert_eq!(plan.stride, 3);
        assert_eq!(plan.start, 2);
        assert_eq!(plan.output_len(), 3);
    }

    #[test]
    fn test_identity_when_stride_at_most_one() {
        let series = numbered(3, &[1.0, 2.0, 3.0]);
        assert_eq!(downsample(&series, 3).unwrap(), series);
        assert_eq!(downsample(&series, 1000).unwrap(), series);
        assert_eq!(downsample(&Series::new(), 5).unwrap(), Series::new());
    }

    #[test]
    fn test_rejects_non_positive_max_points() {
        let series = numbered(0, &[1.0, 2.0]);
        for max_points in [0, -1] {
            assert!(matches!(
                downsample(&series, max_points),
                Err(DishwatchError::Downsample(DownsampleError::InvalidMaxPoints { .. }))
            ));
        }
    }

    #[test]
    fn test_nulls_are_skipped_and_empty_windows_are_null() {
        let values = vec![
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Number(4.0),
            Value::Number(6.0),
            Value::Null,
        ];
        let plan = DownsamplePlan::new(values.len(), 0, 3).unwrap();

        // Windows: [0,2) [0,4) [2,6)
        assert_eq!(
            plan.apply(&values),
            vec![Value::Null, Value::Number(4.0), Value::Number(5.0)]
        );
    }

    #[test]
    fn test_non_numeric_field_falls_back_to_nearest() {
        let values: Vec<Value> = ["a", "b", "c", "d", "e", "f"]
            .into_iter()
            .map(Value::from)
            .collect();
        let plan = DownsamplePlan::new(values.len(), 0, 3).unwrap();

        assert_eq!(
            plan.apply(&values),
            vec![Value::from("a"), Value::from("c"), Value::from("e")]
        );
    }

    #[test]
    fn test_all_fields_share_output_length() {
        let series = Series::from_rows((0u32..37).map(|i| {
            let row = Row::new(f64::from(i)).with_field("num", f64::from(i));
            if i % 3 == 0 {
                row.with_field("text", "x").with_field("flag", true)
            } else {
                row
            }
        }));

        for max_points in 1..40 {
            let reduced = downsample(&series, max_points).unwrap();
            for (_, values) in reduced.columns() {
                assert_eq!(values.len(), reduced.len());
            }
            assert!(reduced.len() <= usize::try_from(max_points).unwrap());
        }
    }
}
