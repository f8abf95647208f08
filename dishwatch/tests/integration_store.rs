//! Integration tests for the store lifecycle.
//!
//! These tests drive the store the way the poller does: repeated history
//! fetches unrolled from a simulated device ring, a status stream, and
//! retention trimming while readers hold snapshots.

use std::sync::Arc;
use std::thread;

use dishwatch::store::{BatchOutcome, RetentionPolicy, SeriesStore, Source, StoreConfig};
use dishwatch::unroll::{HistorySnapshot, unroll};
use dishwatch::value::{Row, Value};

/// Simulated device ring: `writes` samples of `i as f64` written into a ring
/// of `len` slots.
fn device_ring(len: usize, writes: u64) -> HistorySnapshot {
    let mut slots = vec![Value::Number(0.0); len];
    for write in 0..writes {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        {
            slots[(write % len as u64) as usize] = Value::Number((write + 1) as f64);
        }
    }
    HistorySnapshot::new(writes).with_array("sample", slots)
}

fn retain_all() -> SeriesStore {
    SeriesStore::new(StoreConfig {
        status: RetentionPolicy::RetainAll,
        history: RetentionPolicy::RetainAll,
        speedtest: RetentionPolicy::RetainAll,
    })
}

#[test]
fn test_history_fetches_accumulate_across_ring_wraps() {
    let store = retain_all();
    let ring_len = 8;

    // Fetch every 5 writes; the ring wraps several times.
    for (fetch, writes) in [5u64, 10, 15, 20, 25].into_iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let now = 1000.0 + writes as f64;
        let batch = unroll(&device_ring(ring_len, writes), None, now).unwrap();
        let outcome = store.append_history_batch(Source::History, batch, now);

        if fetch == 0 {
            assert_eq!(outcome, BatchOutcome::Replaced(5));
        } else {
            assert_eq!(outcome, BatchOutcome::Appended(5));
        }
    }

    let history = store.latest_raw(Source::History);
    let expected_indices: Vec<u64> = (1..=25).collect();
    assert_eq!(history.indices(), expected_indices.as_slice());

    // The value written as sample n carries index n.
    for (position, &index) in history.indices().iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let expected = Value::Number(index as f64);
        assert_eq!(history.value(position, "sample"), &expected);
    }

    // Timestamps never go backwards.
    assert!(history.timestamps().windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_device_reboot_replaces_history() {
    let store = retain_all();

    let batch = unroll(&device_ring(8, 100), None, 1000.0).unwrap();
    store.append_history_batch(Source::History, batch, 1000.0);
    assert_eq!(store.latest_raw(Source::History).last_index(), Some(100));

    // The cursor restarted; none of the new indices are stored.
    let batch = unroll(&device_ring(8, 3), Some(3), 1010.0).unwrap();
    let outcome = store.append_history_batch(Source::History, batch, 1010.0);

    assert_eq!(outcome, BatchOutcome::Replaced(3));
    assert_eq!(store.latest_raw(Source::History).indices(), &[1, 2, 3]);
}

#[test]
fn test_trim_keeps_exactly_the_window() {
    let store = retain_all();
    for t in 0u32..100 {
        let ts = f64::from(t);
        store.append(Source::Status, Row::new(ts).with_field("t", ts), ts);
    }

    let removed = store.trim(Source::Status, 30.0, 99.5);

    let status = store.latest_raw(Source::Status);
    assert_eq!(removed, 70);
    assert!(status.timestamps().iter().all(|&ts| ts >= 69.5));
    assert_eq!(status.timestamps().first(), Some(&70.0));
    assert_eq!(status.len(), 30);

    // Trimming everything leaves an empty series, not an error.
    store.trim(Source::Status, 0.0, 1e6);
    assert!(store.latest_raw(Source::Status).is_empty());
}

#[test]
fn test_union_schema_across_firmware_changes() {
    let store = retain_all();
    store.append(
        Source::Status,
        Row::new(1.0).with_field("snr", 9.0).with_field("legacyField", 1.0),
        1.0,
    );
    store.append(
        Source::Status,
        Row::new(2.0).with_field("snr", 8.0).with_field("newField", "on"),
        2.0,
    );

    let status = store.latest_raw(Source::Status);
    assert_eq!(
        status.field_names().collect::<Vec<_>>(),
        vec!["legacyField", "newField", "snr"]
    );
    assert_eq!(status.value(1, "legacyField"), &Value::Null);
    assert_eq!(status.value(0, "newField"), &Value::Null);
}

#[test]
fn test_readers_never_observe_partial_appends() {
    let store = Arc::new(SeriesStore::new(StoreConfig {
        status: RetentionPolicy::Window(50.0),
        ..StoreConfig::default()
    }));

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for t in 0u32..2000 {
                let ts = f64::from(t);
                let row = if t % 2 == 0 {
                    Row::new(ts).with_field("even", ts)
                } else {
                    Row::new(ts).with_field("odd", ts)
                };
                store.append(Source::Status, row, ts);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..500 {
                    let snapshot = store.latest_raw(Source::Status);
                    for (_, column) in snapshot.columns() {
                        assert_eq!(column.len(), snapshot.len());
                    }
                    assert!(snapshot.indices().windows(2).all(|w| w[0] < w[1]));
                    assert!(snapshot.timestamps().windows(2).all(|w| w[0] <= w[1]));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let status = store.latest_raw(Source::Status);
    assert_eq!(status.last_index(), Some(1999));
    assert!(status.len() <= 51);
}
