//! Integration tests for the poller against in-process collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dishwatch::collect::{Dish, SpeedTester};
use dishwatch::error::{DishwatchError, FetchError, Result};
use dishwatch::obstruction::ObstructionMap;
use dishwatch::poller::{Poller, PollerConfig, SpeedtestOutcome, UPTIME_FIELD};
use dishwatch::settings::{Settings, SettingsFile};
use dishwatch::store::{BatchOutcome, SeriesStore, Source, StoreConfig, unix_now};
use dishwatch::unroll::HistorySnapshot;
use dishwatch::value::{Row, Value};

const RING_LEN: usize = 16;

/// A dish whose ring cursor advances by one on every history fetch.
#[derive(Default)]
struct FakeDish {
    cursor: AtomicU64,
    uptime: AtomicU64,
    fail_status: AtomicBool,
}

impl FakeDish {
    fn with_state(cursor: u64, uptime: u64) -> Self {
        Self {
            cursor: AtomicU64::new(cursor),
            uptime: AtomicU64::new(uptime),
            fail_status: AtomicBool::new(false),
        }
    }
}

impl Dish for FakeDish {
    async fn fetch_status(&self) -> Result<Row> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(FetchError::Timeout {
                program: "fake".to_string(),
                timeout: Duration::from_secs(1),
            }
            .into());
        }
        let uptime = self.uptime.load(Ordering::SeqCst);
        Ok(Row::new(unix_now())
            .with_field(UPTIME_FIELD, uptime.to_string())
            .with_field("popPingLatencyMs", 30.0))
    }

    async fn fetch_history(&self) -> Result<HistorySnapshot> {
        let current = self.cursor.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(HistorySnapshot::new(current)
            .with_array("snr", vec![Value::Number(9.0); RING_LEN])
            .with_array("popPingDropRate", vec![Value::Number(0.0); RING_LEN]))
    }

    async fn fetch_obstruction_map(&self) -> Result<ObstructionMap> {
        Ok(ObstructionMap {
            num_rows: 1,
            num_cols: 2,
            snr: vec![Some(1.0), None],
            ..ObstructionMap::default()
        })
    }
}

/// A speedtest that takes `delay` and counts its runs.
struct FakeSpeedtest {
    delay: Duration,
    runs: Arc<AtomicUsize>,
}

impl FakeSpeedtest {
    fn new(delay: Duration) -> (Self, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Self {
                delay,
                runs: Arc::clone(&runs),
            },
            runs,
        )
    }
}

impl SpeedTester for FakeSpeedtest {
    async fn run_speedtest(&self) -> Result<Row> {
        tokio::time::sleep(self.delay).await;
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(Row::new(unix_now()).with_field("download", 1e8))
    }
}

fn poller(
    dish: FakeDish,
    speedtest: FakeSpeedtest,
    settings: Settings,
) -> Arc<Poller<FakeDish, FakeSpeedtest>> {
    Arc::new(Poller::new(
        dish,
        speedtest,
        Arc::new(SeriesStore::new(StoreConfig::default())),
        Arc::new(SettingsFile::in_memory(settings)),
    ))
}

#[tokio::test]
async fn test_history_is_capped_by_status_uptime() {
    let (speedtest, _) = FakeSpeedtest::new(Duration::ZERO);
    let poller = poller(FakeDish::with_state(99, 4), speedtest, Settings::default());

    // Without a status row the cursor alone bounds the ring.
    let outcome = poller.poll_history().await.unwrap();
    assert_eq!(outcome, BatchOutcome::Replaced(RING_LEN));

    // With 4 s of uptime only the newest 4 slots count; they still overlap
    // the stored tail, so just the one new sample is appended.
    poller.poll_status().await.unwrap();
    let outcome = poller.poll_history().await.unwrap();
    assert_eq!(outcome, BatchOutcome::Appended(1));

    let history = poller.store().latest_raw(Source::History);
    assert_eq!(history.last_index(), Some(101));
}

#[tokio::test]
async fn test_uptime_drop_replaces_history_with_reused_indices() {
    let (speedtest, _) = FakeSpeedtest::new(Duration::ZERO);
    let poller = poller(FakeDish::with_state(99, 1000), speedtest, Settings::default());

    poller.poll_status().await.unwrap();
    assert_eq!(poller.poll_history().await.unwrap(), BatchOutcome::Replaced(RING_LEN));
    assert_eq!(
        poller.store().latest_raw(Source::History).indices().first(),
        Some(&85)
    );

    // Restart: the counter is back inside the stored index range and the
    // dish has only been up for 5 s.
    poller.dish().cursor.store(91, Ordering::SeqCst);
    poller.dish().uptime.store(5, Ordering::SeqCst);
    poller.poll_status().await.unwrap();

    assert_eq!(poller.poll_history().await.unwrap(), BatchOutcome::Replaced(5));
    let history = poller.store().latest_raw(Source::History);
    assert_eq!(history.indices(), &[88, 89, 90, 91, 92]);
}

#[tokio::test]
async fn test_obstruction_map_bypasses_store() {
    let (speedtest, _) = FakeSpeedtest::new(Duration::ZERO);
    let poller = poller(FakeDish::default(), speedtest, Settings::default());

    let map = poller.dish().fetch_obstruction_map().await.unwrap();

    assert_eq!(map.snr, vec![Some(1.0), None]);
    assert!(poller.store().is_empty());
}

#[tokio::test]
async fn test_failed_status_poll_stores_nothing() {
    let (speedtest, _) = FakeSpeedtest::new(Duration::ZERO);
    let dish = FakeDish::default();
    dish.fail_status.store(true, Ordering::SeqCst);
    let poller = poller(dish, speedtest, Settings::default());

    let err = poller.poll_status().await.unwrap_err();

    assert!(matches!(err, DishwatchError::Fetch(FetchError::Timeout { .. })));
    assert!(poller.store().latest_raw(Source::Status).is_empty());
}

#[tokio::test]
async fn test_speedtest_respects_setting_but_trigger_does_not() {
    let (speedtest, runs) = FakeSpeedtest::new(Duration::ZERO);
    let settings = Settings {
        speedtest_enabled: false,
        ..Settings::default()
    };
    let poller = poller(FakeDish::default(), speedtest, settings);

    assert_eq!(
        poller.poll_speedtest().await.unwrap(),
        SpeedtestOutcome::Disabled
    );
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert_eq!(
        poller.trigger_speedtest().await.unwrap(),
        SpeedtestOutcome::Recorded(0)
    );
    assert_eq!(poller.store().len(Source::Speedtest), 1);
}

#[tokio::test]
async fn test_trigger_is_single_flight() {
    let (speedtest, runs) = FakeSpeedtest::new(Duration::from_millis(200));
    let poller = poller(FakeDish::default(), speedtest, Settings::default());

    let first = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move { poller.trigger_speedtest().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        poller.trigger_speedtest().await.unwrap(),
        SpeedtestOutcome::InFlight
    );
    assert_eq!(
        first.await.unwrap().unwrap(),
        SpeedtestOutcome::Recorded(0)
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_spawned_tasks_poll_until_shutdown() {
    let (speedtest, runs) = FakeSpeedtest::new(Duration::ZERO);
    let poller = poller(FakeDish::with_state(0, 10_000), speedtest, Settings::default());

    let mut tasks = poller.spawn(PollerConfig {
        status_interval: Duration::from_millis(10),
        history_interval: Duration::from_millis(20),
        speedtest_interval: Duration::from_secs(3600),
    });
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(tasks.is_running());

    tasks.shutdown().await;
    assert!(!tasks.is_running());

    let store = poller.store();
    let status_rows = store.len(Source::Status);
    assert!(status_rows >= 2);
    assert!(store.len(Source::History) >= 2);
    // The speedtest task fires once immediately.
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.len(Source::Status), status_rows);
}
