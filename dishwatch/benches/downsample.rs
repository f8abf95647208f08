//! Microbenchmarks for the read path.
//!
//! Measures unroll, merge and downsample over dashboard-sized series.
//!
//! Run with: `cargo bench -p dishwatch -- downsample`

#![allow(missing_docs, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dishwatch::downsample::downsample;
use dishwatch::merge::{merge, merge_since};
use dishwatch::series::Series;
use dishwatch::unroll::{HistorySnapshot, unroll};
use dishwatch::value::{Row, Value};

const FIELDS: [&str; 6] = [
    "popPingDropRate",
    "popPingLatencyMs",
    "downlinkThroughputBps",
    "uplinkThroughputBps",
    "snr",
    "obstructed",
];

/// Builds a history-like series of `rows` rows with a mix of numeric, null
/// and boolean fields.
fn history_series(rows: u64) -> Series {
    Series::from_rows((0..rows).map(|i| {
        let mut row = Row::new(1_700_000_000.0 + i as f64).with_index(i + 1);
        for (n, field) in FIELDS.iter().enumerate() {
            let value = match n {
                5 => Value::Bool(i % 97 == 0),
                _ if i % 13 == 0 => Value::Null,
                _ => Value::Number((i * (n as u64 + 1)) as f64),
            };
            row = row.with_field(field, value);
        }
        row
    }))
}

fn bench_downsample(c: &mut Criterion) {
    let mut group = c.benchmark_group("downsample");

    for rows in [600u64, 43_200, 259_200] {
        let series = history_series(rows);
        group.bench_with_input(BenchmarkId::new("to_200", rows), &series, |b, series| {
            b.iter(|| downsample(black_box(series), black_box(200)).unwrap());
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let history = history_series(43_200);
    let status = Series::from_rows((0..30u32).map(|i| {
        Row::new(1_700_043_200.0 + f64::from(i)).with_field("deviceState.uptimeS", "86400")
    }));

    c.bench_function("merge/43200_plus_30", |b| {
        b.iter(|| merge(black_box(&history), black_box(&status)));
    });

    c.bench_function("merge_since/43200_plus_30_last_600s", |b| {
        b.iter(|| merge_since(black_box(&history), black_box(&status), black_box(1_700_042_630.0)));
    });
}

fn bench_unroll(c: &mut Criterion) {
    let ring_len = 43_200usize;
    let mut snapshot = HistorySnapshot::new(1_000_000);
    for field in FIELDS {
        snapshot = snapshot.with_array(
            field,
            (0..ring_len).map(|i| Value::Number(i as f64)).collect(),
        );
    }

    c.bench_function("unroll/43200x6", |b| {
        b.iter(|| unroll(black_box(&snapshot), Some(86_400), 1_700_000_000.0).unwrap());
    });
}

criterion_group!(benches, bench_downsample, bench_merge, bench_unroll);
criterion_main!(benches);
