//! End-to-end estimator scenarios against the simulated cell.
//!
//! The reference board: 4000 mAh, terminal 3450 mV, taper 4180 mV / 150 mA,
//! suspend drain 50 µA, built-in OCV curve.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]

use std::cell::RefCell;
use std::rc::Rc;

use fuel_gauge::{
    BatteryHealth, BatteryReport, ChargeStatus, Gauge, GaugeConfig, NullObserver, SocObserver,
    SOC_FULL,
};
use platform::mocks::{
    ChargerEvent, InstantDelay, MemoryStore, SimBattery, SimCharger, SimMonitor, SimState,
};
use platform::PersistKey;

type TestGauge<N> = Gauge<SimMonitor, SimCharger, MemoryStore, InstantDelay, N>;

async fn attach<N: SocObserver>(
    cell: &SimBattery,
    store: &MemoryStore,
    observer: N,
    now_s: u64,
) -> TestGauge<N> {
    Gauge::attach(
        GaugeConfig::default(),
        cell.monitor(),
        cell.charger(),
        store.clone(),
        InstantDelay::new(),
        observer,
        now_s,
    )
    .await
    .unwrap()
}

fn idle_cell(ocv_mv: u32) -> SimBattery {
    SimBattery::new(SimState {
        ocv_mv,
        ..SimState::default()
    })
}

/// Scenario B cell: 3718 mV OCV (20 %), 250 mΩ, 500 mA load.
fn discharging_cell() -> SimBattery {
    SimBattery::new(SimState {
        ocv_mv: 3718,
        resistance_mohm: 250,
        load_ma: 500,
        ..SimState::default()
    })
}

fn charging_cell(ocv_mv: u32) -> SimBattery {
    SimBattery::new(SimState {
        ocv_mv,
        resistance_mohm: 200,
        adapter_present: true,
        charger_enabled: true,
        ..SimState::default()
    })
}

fn full_candidate_cell() -> SimBattery {
    SimBattery::new(SimState {
        ocv_mv: 4200,
        adapter_present: true,
        charger_enabled: false,
        ..SimState::default()
    })
}

// ── Reference scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_idle_at_3700mv_shows_15_percent() {
    let cell = idle_cell(3700);
    let store = MemoryStore::new();
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    gauge.tick().await;

    assert_eq!(gauge.state().status, ChargeStatus::NotCharging);
    assert_eq!(gauge.state().soc_show, 15);
    assert_eq!(gauge.soc_percent(), 15);
    // Nothing was stored yet, so the first tick persists.
    assert_eq!(store.value(PersistKey::Soc), Some(15_000));
}

#[tokio::test]
async fn scenario_b_ten_discharge_ticks_step_17_each() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    assert_eq!(gauge.state().status, ChargeStatus::Discharging);
    assert_eq!(gauge.state().soc_now, 20_000);

    for _ in 0..10 {
        assert_eq!(gauge.tick().await, 5);
    }

    assert_eq!(gauge.state().soc_now, 19_830);
    assert_eq!(gauge.state().soc_show, 19);
}

#[tokio::test]
async fn scenario_c_one_hour_suspend_drains_one_unit() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    gauge.suspend(1_000).await;
    gauge.resume(1_000 + 3_600).await;

    assert_eq!(gauge.state().soc_now, 19_999);
}

// ── Suspend / resume ────────────────────────────────────────────────────────

#[tokio::test]
async fn resume_skips_compensation_when_charger_was_active() {
    let cell = SimBattery::new(SimState {
        ocv_mv: 3800,
        charger_enabled: true,
        ..SimState::default()
    });
    let store = MemoryStore::new();
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    let before = gauge.state().soc_now;

    gauge.suspend(0).await;
    gauge.resume(86_400).await;

    assert_eq!(gauge.state().soc_now, before);
}

#[tokio::test]
async fn suspend_flushes_soc() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    for _ in 0..3 {
        gauge.tick().await;
    }

    gauge.suspend(100).await;

    assert_eq!(store.writes().last(), Some(&(PersistKey::Soc, 19_949)));
}

// ── Attach-time restore ─────────────────────────────────────────────────────

#[tokio::test]
async fn power_off_time_is_compensated_at_attach() {
    let cell = idle_cell(3800);
    let store = MemoryStore::with(&[(PersistKey::Soc, 50_000), (PersistKey::ShutdownHour, 10)]);
    // 24 h off at 30 µA: 86400 * 30 / (4000 * 36) = 18
    let gauge = attach(&cell, &store, NullObserver, 34 * 3600).await;
    assert_eq!(gauge.state().soc_now, 49_982);
}

#[tokio::test]
async fn implausible_restored_soc_is_discarded() {
    let cell = idle_cell(3700);
    let store = MemoryStore::with(&[(PersistKey::Soc, 90_000)]);
    let gauge = attach(&cell, &store, NullObserver, 0).await;
    assert_eq!(gauge.state().soc_now, 15_000);
}

#[tokio::test]
async fn learned_capacity_is_restored() {
    let cell = idle_cell(3800);
    let store = MemoryStore::with(&[(PersistKey::RealCapacity, 3600)]);
    let gauge = attach(&cell, &store, NullObserver, 0).await;
    assert_eq!(gauge.state().real_capacity_mah, 3600);
}

#[tokio::test]
async fn invalid_config_refuses_to_attach() {
    let cell = idle_cell(3800);
    let config = GaugeConfig {
        capacity_mah: 0,
        ..GaugeConfig::default()
    };
    let result = Gauge::attach(
        config,
        cell.monitor(),
        cell.charger(),
        MemoryStore::new(),
        InstantDelay::new(),
        NullObserver,
        0,
    )
    .await;
    assert!(matches!(
        result,
        Err(fuel_gauge::GaugeError::ConfigInvalid(fuel_gauge::ConfigField::Capacity))
    ));
}

#[tokio::test]
async fn dead_cell_is_flagged_after_trickle_charge() {
    let cell = idle_cell(2900);
    let store = MemoryStore::new();
    let gauge = attach(&cell, &store, NullObserver, 0).await;

    assert_eq!(gauge.report().health, BatteryHealth::Unknown);
    let log = cell.snapshot().charger_log;
    assert!(log.contains(&ChargerEvent::Current(100)));
    assert_eq!(log.last(), Some(&ChargerEvent::Current(1500)));
}

#[tokio::test]
async fn low_cell_that_recovers_under_trickle_is_good() {
    let cell = SimBattery::new(SimState {
        ocv_mv: 2990,
        adapter_present: true,
        ..SimState::default()
    });
    let gauge = attach(&cell, &MemoryStore::new(), NullObserver, 0).await;
    assert_eq!(gauge.report().health, BatteryHealth::Good);
}

// ── Discharge ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn discharge_never_raises_soc_now() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    let mut last = gauge.state().soc_now;
    for n in 0..60u32 {
        // Wander the OCV and sprinkle small read noise.
        cell.update(|s| {
            s.ocv_mv = if n % 7 == 0 { 3722 } else { 3716 - n / 10 };
            s.voltage_offsets.extend([3, -2, 0, 1, -3, 2, 0, -1, 4, -4]);
        });
        gauge.tick().await;
        let state = gauge.state();
        assert!(state.soc_now <= last, "tick {}: {} > {}", n, state.soc_now, last);
        assert!(state.soc_now <= SOC_FULL);
        assert_eq!(state.soc_show, state.soc_now / 1000);
        last = state.soc_now;
    }
}

#[tokio::test]
async fn failed_read_skips_tick_and_polls_fast() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    cell.update(|s| s.failing_reads = 1);
    assert_eq!(gauge.tick().await, 2);
    assert_eq!(gauge.state().soc_now, 20_000);
    assert_eq!(gauge.snapshot().skipped_ticks, 1);

    // Recovered: normal pass, normal cadence.
    assert_eq!(gauge.tick().await, 5);
    assert!(gauge.state().soc_now < 20_000);
}

#[tokio::test]
async fn unstable_window_skips_tick() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    cell.update(|s| s.voltage_offsets.extend([200, 200, 200, 200]));
    gauge.tick().await;

    assert_eq!(gauge.state().soc_now, 20_000);
    assert_eq!(gauge.snapshot().skipped_ticks, 1);
}

fn current_commands(cell: &SimBattery) -> usize {
    cell.snapshot()
        .charger_log
        .iter()
        .filter(|e| matches!(e, ChargerEvent::Current(_)))
        .count()
}

#[tokio::test]
async fn step_test_survives_failed_tick() {
    let cell = charging_cell(3800);
    let store = MemoryStore::new();
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    // Probe plus two step windows succeed, the measure window then fails.
    cell.update(|s| s.fail_read_after = Some(41));
    assert_eq!(gauge.tick().await, 2);
    assert_eq!(gauge.snapshot().skipped_ticks, 1);
    assert_eq!(gauge.state().charge_resistance_mohm, 200);
    assert_eq!(gauge.state().soc_real, 65_000);
    let commands = current_commands(&cell);
    assert!(commands > 0);

    // Same band: no second step test, and the pending correction applies.
    gauge.tick().await;
    assert_eq!(current_commands(&cell), commands);
    assert_eq!(gauge.state().soc_real, 50_000);
}

#[tokio::test]
async fn failed_full_power_read_restores_charger() {
    let cell = SimBattery::new(SimState {
        ocv_mv: 4200,
        adapter_present: true,
        charger_enabled: true,
        ..SimState::default()
    });
    let store = MemoryStore::with(&[(PersistKey::Soc, 95_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    // Probe plus one window succeed; the settled OCV read fails.
    cell.update(|s| s.fail_read_after = Some(21));
    gauge.tick().await;

    assert_eq!(gauge.snapshot().skipped_ticks, 1);
    let state = cell.snapshot();
    assert!(state.charger_enabled);
    assert!(state
        .charger_log
        .ends_with(&[ChargerEvent::Enabled(false), ChargerEvent::Enabled(true)]));
}

#[tokio::test]
async fn empty_latch_learns_capacity_after_full_discharge() {
    let cell = SimBattery::new(SimState {
        ocv_mv: 3800,
        resistance_mohm: 50,
        load_ma: 4000,
        ..SimState::default()
    });
    let store = MemoryStore::with(&[(PersistKey::Soc, SOC_FULL)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    assert_eq!(gauge.state().status, ChargeStatus::Discharging);

    for _ in 0..500 {
        gauge.tick().await;
    }
    assert!(gauge.state().soc_now >= 1_000);

    // Below the hard cutoff: latch on the next pass.
    cell.update(|s| s.ocv_mv = 3400);
    gauge.tick().await;

    let state = gauge.state();
    assert_eq!(state.soc_now, 1);
    assert_eq!(state.soc_show, 0);
    assert!(
        (2000..=6000).contains(&state.real_capacity_mah),
        "learned {} mAh",
        state.real_capacity_mah
    );
    assert_eq!(
        store.value(PersistKey::RealCapacity),
        Some(state.real_capacity_mah)
    );
}

// ── Charge ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn charge_calibration_authorises_one_downward_correction() {
    let cell = charging_cell(3800);
    let store = MemoryStore::new();
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    assert_eq!(gauge.state().status, ChargeStatus::Charging);
    // Default 150 mΩ underestimates the 200 mΩ cell: 4100 - 225 = 3875 mV.
    assert_eq!(gauge.state().soc_real, 65_000);

    // First pass calibrates to 200 mΩ; the corrected 3800 mV OCV may lower
    // soc_real once.
    gauge.tick().await;
    assert_eq!(gauge.state().charge_resistance_mohm, 200);
    assert_eq!(gauge.state().soc_real, 50_000);
    assert_eq!(gauge.state().soc_now, 65_000);

    // Second pass: a 30 mV sag must not lower it again.
    cell.update(|s| s.voltage_offsets.extend([-30; 10]));
    gauge.tick().await;
    assert_eq!(gauge.state().soc_real, 50_000);
}

#[tokio::test]
async fn charging_never_lowers_soc_real() {
    let cell = charging_cell(3800);
    let store = MemoryStore::new();
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    gauge.tick().await;

    let mut last_real = gauge.state().soc_real;
    let mut last_now = gauge.state().soc_now;
    for n in 0..15u32 {
        cell.update(|s| {
            s.ocv_mv += 2;
            if n % 4 == 0 {
                s.voltage_offsets.extend([-25; 10]);
            }
        });
        gauge.tick().await;
        let state = gauge.state();
        assert!(state.soc_real >= last_real, "tick {}", n);
        assert!(state.soc_now >= last_now, "tick {}", n);
        last_real = state.soc_real;
        last_now = state.soc_now;
    }
}

#[tokio::test]
async fn discharge_recalibration_lets_soc_real_rise_once() {
    // 60 % at rest: 3845 mV.
    let cell = SimBattery::new(SimState {
        ocv_mv: 3845,
        resistance_mohm: 250,
        load_ma: 500,
        ..SimState::default()
    });
    let store = MemoryStore::with(&[(PersistKey::Soc, 60_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    // A sag the resistance clamp cannot explain pulls soc_real down.
    cell.update(|s| s.ocv_mv = 3700);
    gauge.tick().await;
    let low = gauge.state().soc_real;
    assert!(low < 57_000, "soc_real {}", low);

    // Recovered: the divergence recalibration may lift it once.
    cell.update(|s| s.ocv_mv = 3845);
    gauge.tick().await;
    let raised = gauge.state().soc_real;
    assert!(raised > low + 3_000, "soc_real {} after {}", raised, low);
    let now = gauge.state().soc_now;

    // Below the calibration current nothing recalibrates, so a higher
    // estimate is ignored.
    cell.update(|s| {
        s.ocv_mv = 3860;
        s.load_ma = 90;
    });
    gauge.tick().await;
    assert_eq!(gauge.state().status, ChargeStatus::Discharging);
    assert_eq!(gauge.state().soc_real, raised);
    assert!(gauge.state().soc_now <= now);
}

#[tokio::test]
async fn full_power_dwell_confirms_full_and_enables_charger_once() {
    let cell = full_candidate_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 95_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    let mut ticks = 0;
    while gauge.state().soc_real < SOC_FULL {
        gauge.tick().await;
        ticks += 1;
        assert!(ticks <= 40, "dwell never completed");
        if gauge.state().soc_real < SOC_FULL {
            assert_eq!(cell.enable_count(), 0);
        }
    }

    // First pass adds the 5 s default interval, then 2 s per pass: 5 + 28 * 2.
    assert_eq!(ticks, 29);
    assert_eq!(gauge.state().soc_real, SOC_FULL);
    assert_eq!(gauge.state().dwell_s, 0);
    assert_eq!(cell.enable_count(), 1);

    // From here on the display trickles up and the charger is left alone.
    let before = gauge.state().soc_now;
    gauge.tick().await;
    assert_eq!(gauge.state().soc_now, before + 500);
    assert_eq!(cell.enable_count(), 1);
}

#[tokio::test]
async fn single_dip_resets_dwell_timer() {
    let cell = full_candidate_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 95_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    for _ in 0..3 {
        gauge.tick().await;
    }
    assert_eq!(gauge.state().dwell_s, 9);

    cell.update(|s| s.ocv_mv = 4100);
    gauge.tick().await;

    assert_eq!(gauge.state().dwell_s, 0);
    assert!(gauge.state().soc_real < SOC_FULL);
    assert_eq!(cell.enable_count(), 1);
}

// ── Idle ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn converged_idle_estimate_is_stable() {
    // Charger on, no adapter: the weak-adapter branch with nothing to do.
    let cell = SimBattery::new(SimState {
        ocv_mv: 3700,
        charger_enabled: true,
        ..SimState::default()
    });
    let mut gauge = attach(&cell, &MemoryStore::new(), NullObserver, 0).await;
    assert_eq!(gauge.state().soc_now, 15_000);

    for _ in 0..5 {
        gauge.tick().await;
        assert_eq!(gauge.state().soc_now, 15_000);
        assert_eq!(gauge.state().soc_real, 15_000);
    }
}

#[tokio::test]
async fn weak_adapter_nudges_towards_table_value() {
    let cell = SimBattery::new(SimState {
        ocv_mv: 3700,
        charger_enabled: true,
        ..SimState::default()
    });
    // 17 % stored, 15 % measured: within the restore window, so kept.
    let store = MemoryStore::with(&[(PersistKey::Soc, 17_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    gauge.tick().await;
    assert_eq!(gauge.state().soc_now, 16_500);
    gauge.tick().await;
    assert_eq!(gauge.state().soc_now, 16_000);
}

// ── Outward API ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn observer_fires_only_on_visible_change() {
    let seen: Rc<RefCell<Vec<BatteryReport>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let cell = idle_cell(3700);
    let mut gauge = attach(
        &cell,
        &MemoryStore::new(),
        move |r: &BatteryReport| sink.borrow_mut().push(*r),
        0,
    )
    .await;

    for _ in 0..4 {
        gauge.tick().await;
    }
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].percent, 15);

    cell.update(|s| s.temperature_dc = Some(251));
    gauge.tick().await;
    assert_eq!(seen.borrow().len(), 2);
    assert_eq!(seen.borrow()[1].temperature_dc, 251);
}

#[tokio::test]
async fn skipped_tick_does_not_notify() {
    let seen: Rc<RefCell<Vec<BatteryReport>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let cell = idle_cell(3700);
    let mut gauge = attach(
        &cell,
        &MemoryStore::new(),
        move |r: &BatteryReport| sink.borrow_mut().push(*r),
        0,
    )
    .await;

    cell.update(|s| s.failing_reads = 1);
    gauge.tick().await;
    assert!(seen.borrow().is_empty());
}

#[tokio::test]
async fn shutdown_writes_soc_and_hour() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    gauge.tick().await;

    gauge.shutdown(7 * 3600 + 59).await.unwrap();

    assert_eq!(store.value(PersistKey::Soc), Some(19_983));
    assert_eq!(store.value(PersistKey::ShutdownHour), Some(7));
}

#[tokio::test]
async fn shutdown_reports_store_failure() {
    let cell = discharging_cell();
    let store = MemoryStore::new();
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    store.fail_writes(true);
    assert_eq!(
        gauge.shutdown(0).await,
        Err(fuel_gauge::GaugeError::PersistenceUnavailable)
    );
}

#[tokio::test]
async fn reset_learned_clears_store() {
    let cell = idle_cell(3800);
    let store = MemoryStore::with(&[(PersistKey::Soc, 50_000), (PersistKey::RealCapacity, 3600)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;

    gauge.reset_learned().await.unwrap();

    assert_eq!(store.value(PersistKey::Soc), None);
    assert_eq!(store.value(PersistKey::RealCapacity), None);
    assert_eq!(gauge.state().real_capacity_mah, 0);
}

#[tokio::test]
async fn snapshot_reports_both_resistances() {
    let cell = discharging_cell();
    let store = MemoryStore::with(&[(PersistKey::Soc, 20_000)]);
    let mut gauge = attach(&cell, &store, NullObserver, 0).await;
    gauge.tick().await;

    let snap = gauge.snapshot();
    assert_eq!(snap.status, ChargeStatus::Discharging);
    assert_eq!(snap.voltage_mv, 3593);
    assert_eq!(snap.current_ma, -500);
    assert_eq!(snap.charge_resistance_mohm, 150);
    assert_eq!(snap.discharge_resistance_mohm, 250);
    assert_eq!(snap.ocv_mv, 3718);
    assert!(snap.to_string().contains("ibatt:       -500 mA"));
}
