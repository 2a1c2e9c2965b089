//! Async polling service: locking, suspend/resume and the run loop.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::arithmetic_side_effects)]

use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::Timer;
use fuel_gauge::{Gauge, GaugeConfig, GaugeService, NullObserver};
use platform::mocks::{
    ChargerEvent, InstantDelay, ManualClock, MemoryStore, SimBattery, SimCharger, SimMonitor,
    SimState,
};
use platform::{PersistKey, PersistenceStore, WallClock};

type TestService<S = MemoryStore> =
    GaugeService<NoopRawMutex, SimMonitor, SimCharger, S, InstantDelay, NullObserver, ManualClock>;

async fn service<S: PersistenceStore + Clone>(
    cell: &SimBattery,
    store: &S,
    clock: &ManualClock,
) -> TestService<S> {
    let gauge = Gauge::attach(
        GaugeConfig::default(),
        cell.monitor(),
        cell.charger(),
        store.clone(),
        InstantDelay::new(),
        NullObserver,
        clock.now_secs(),
    )
    .await
    .unwrap();
    GaugeService::new(gauge, clock.clone())
}

/// Store whose writes take a while, like a flash page program.
#[derive(Clone)]
struct SlowStore(MemoryStore);

impl PersistenceStore for SlowStore {
    type Error = <MemoryStore as PersistenceStore>::Error;

    async fn get(&mut self, key: PersistKey) -> Result<Option<u32>, Self::Error> {
        self.0.get(key).await
    }

    async fn set(&mut self, key: PersistKey, value: u32) -> Result<(), Self::Error> {
        Timer::after_millis(300).await;
        self.0.set(key, value).await
    }

    async fn clear(&mut self, key: PersistKey) -> Result<(), Self::Error> {
        self.0.clear(key).await
    }
}

fn idle_cell() -> SimBattery {
    // Charger off: every pass that gets as far as the idle policy turns it on.
    SimBattery::new(SimState {
        ocv_mv: 3700,
        ..SimState::default()
    })
}

fn discharging_cell() -> SimBattery {
    SimBattery::new(SimState {
        ocv_mv: 3718,
        resistance_mohm: 250,
        load_ma: 500,
        ..SimState::default()
    })
}

#[tokio::test]
async fn tick_and_query_share_one_gauge() {
    let cell = idle_cell();
    let clock = ManualClock::new(0);
    let svc = service(&cell, &MemoryStore::new(), &clock).await;

    assert_eq!(svc.tick().await, 5);
    assert_eq!(svc.soc_percent().await, 15);
    assert_eq!(svc.snapshot().await.soc_now, 15_000);
}

#[tokio::test]
async fn suspend_resume_compensates_with_wall_clock() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let clock = ManualClock::new(10_000);
    let svc = service(&cell, &store, &clock).await;

    svc.suspend().await;
    clock.advance(3_600);
    svc.resume().await;

    assert_eq!(svc.snapshot().await.soc_now, 19_999);
}

#[tokio::test]
async fn run_ticks_immediately_after_resume() {
    let cell = idle_cell();
    let clock = ManualClock::new(0);
    let svc = service(&cell, &MemoryStore::new(), &clock).await;

    let script = async {
        svc.suspend().await;
        // Parked: the 5 s timer was cancelled and nothing runs.
        Timer::after_millis(50).await;
        assert_eq!(cell.enable_count(), 0);

        clock.advance(60);
        svc.resume().await;
        Timer::after_millis(50).await;
        assert!(cell.snapshot().charger_log.contains(&ChargerEvent::Enabled(true)));
    };

    match select(svc.run(), script).await {
        Either::First(never) => never,
        Either::Second(()) => {}
    }
}

#[tokio::test]
async fn tick_queued_behind_suspend_does_not_run() {
    let cell = idle_cell();
    let store = SlowStore(MemoryStore::with(&[(PersistKey::Soc, 15_000)]));
    let clock = ManualClock::new(0);
    let svc = service(&cell, &store, &clock).await;

    // The suspend flush holds the lock for 300 ms; the tick queues behind it.
    let ((), interval) = join(svc.suspend(), svc.tick()).await;

    assert!(svc.is_suspended());
    assert_eq!(interval, 5);
    assert_eq!(cell.enable_count(), 0);
    assert_eq!(svc.tick().await, 5);
    assert_eq!(cell.enable_count(), 0);

    svc.resume().await;
    assert!(!svc.is_suspended());
    svc.tick().await;
    assert_eq!(cell.enable_count(), 1);
}

#[tokio::test]
async fn shutdown_through_service_stamps_hour() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let clock = ManualClock::new(5 * 3600 + 10);
    let svc = service(&cell, &store, &clock).await;

    svc.shutdown().await.unwrap();

    assert_eq!(store.value(PersistKey::ShutdownHour), Some(5));
    assert_eq!(store.value(PersistKey::Soc), Some(20_000));
}
