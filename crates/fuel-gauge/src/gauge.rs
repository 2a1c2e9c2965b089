//! The estimator.
//!
//! [`Gauge`] owns the configuration, the lookup table, the state and every
//! collaborator. One call to [`Gauge::tick`] is one full estimation pass:
//! status probe, sample window, OCV/SOC, the per-state policy, smoothing,
//! persistence and notification.
//!
//! # Charge state machine
//!
//! ```text
//!                 I > 0                      I < 0
//!   ┌──────────┐ ───────▶ ┌──────────┐ ◀─────── ┌─────────────┐
//!   │NotCharging│          │ Charging │          │ Discharging │
//!   └──────────┘ ◀─────── └──────────┘ ───────▶ └─────────────┘
//!        │        I == 0        │
//!        └──── full power ◀─────┘   (charger off, OCV dwell ≥ 60 s ⇒ 100 %)
//! ```
//!
//! Any transition resets the per-session counters. Entering `Discharging`
//! also forces a discharge-resistance recalibration on the next pass.

use core::sync::atomic::AtomicBool;

use embedded_hal_async::delay::DelayNs;
use platform::{BatteryMonitor, ChargerControl, PersistKey, PersistenceStore};

use crate::config::GaugeConfig;
use crate::filter::{collect_window, filter_window, probe_current, FilteredWindow};
use crate::ocv::{compute, constrain_soc_real, OcvEstimate, Resistances};
use crate::persist;
use crate::report::{BatteryReport, GaugeSnapshot, SocObserver};
use crate::resistance::{charge_step_test, estimate_discharge};
use crate::smooth::{coulomb_step, down_curve_smooth, grow_up, nudge_towards};
use crate::smooth::{DownCounters, DownInput, NUDGE_STEP, PLATEAU_ALLOWANCE};
use crate::state::{BatteryHealth, ChargeStatus, GaugeState, SuspendRecord};
use crate::table::OcvSocTable;
use crate::{GaugeError, SOC_FULL};

/// Highest SOC the charging path may assign; only the dwell timer reaches 100 %
pub const CHARGE_CEILING: u32 = 99_000;

/// Full-power dwell needed to confirm a full charge (s)
pub const FULL_DWELL_S: u32 = 60;

/// Charger settle time before the full-power OCV sample
pub const FULL_POWER_SETTLE_MS: u32 = 1000;

/// Programmed currents above this use the current-collapse full check (mA)
pub const LOW_CHARGE_CURRENT_MA: u32 = 500;

/// Voltage below which the cell is suspected dead (mV)
pub const DEAD_BATTERY_MV: u32 = 3000;

/// Trickle current used to probe a suspected dead cell (mA)
pub const DEAD_PROBE_CURRENT_MA: u32 = 100;

/// Settle time of the dead-battery probe
pub const DEAD_PROBE_SETTLE_MS: u32 = 1000;

/// `soc_now` further than this from a fresh estimate forces a recalibration
pub const DIVERGENCE_RECAL: u32 = 250;

/// Software state-of-charge estimator
pub struct Gauge<M, C, S, D, N> {
    config: GaugeConfig,
    table: OcvSocTable,
    state: GaugeState,
    monitor: M,
    charger: C,
    store: S,
    delay: D,
    observer: N,
}

impl<M, C, S, D, N> Gauge<M, C, S, D, N>
where
    M: BatteryMonitor,
    C: ChargerControl,
    S: PersistenceStore,
    D: DelayNs,
    N: SocObserver,
{
    /// Bring the gauge up.
    ///
    /// Restores learned capacity and the last SOC (compensated for the time
    /// spent powered off), takes one fresh OCV estimate, and probes a
    /// suspiciously low cell. Hardware trouble during attach is logged and
    /// leaves the estimate to the first tick.
    ///
    /// # Errors
    ///
    /// Only [`GaugeError::ConfigInvalid`].
    pub async fn attach(
        config: GaugeConfig,
        monitor: M,
        charger: C,
        store: S,
        delay: D,
        observer: N,
        now_s: u64,
    ) -> Result<Self, GaugeError> {
        let table = config.build_table()?;
        let mut gauge = Self {
            config,
            table,
            state: GaugeState::default(),
            monitor,
            charger,
            store,
            delay,
            observer,
        };

        let capacity = persist::load(&mut gauge.store, PersistKey::RealCapacity).await;
        gauge.state.real_capacity_mah = capacity.unwrap_or(0);

        if gauge
            .charger
            .set_charge_current_ma(gauge.config.charge_current_ma)
            .await
            .is_err()
        {
            warn!("attach: charger rejected charge current");
        }

        let status = match probe_current(&mut gauge.monitor, &gauge.config).await {
            Ok(current) => ChargeStatus::from_current(current),
            Err(e) => {
                warn!("attach: status probe failed: {}", e);
                ChargeStatus::NotCharging
            }
        };
        gauge.state.status = status;

        let fresh = match gauge.measure(status).await {
            Ok((estimate, _)) => Some(estimate),
            Err(e) => {
                warn!("attach: no fresh estimate: {}", e);
                None
            }
        };
        if let Some(estimate) = fresh {
            gauge.record(status, &estimate);
            if estimate.vbatt_avg_mv < DEAD_BATTERY_MV {
                gauge.probe_dead_battery().await;
            }
        }

        gauge.restore_soc(fresh.map(|e| e.soc), now_s).await;
        if status == ChargeStatus::Discharging {
            gauge.state.enter_discharge();
        }

        info!(
            "gauge attached: {} soc {} ({}%) capacity {} mAh learned {} mAh",
            status,
            gauge.state.soc_now,
            gauge.state.soc_show,
            gauge.config.capacity_mah,
            gauge.state.real_capacity_mah
        );
        Ok(gauge)
    }

    async fn restore_soc(&mut self, fresh: Option<u32>, now_s: u64) {
        let stored = persist::load(&mut self.store, PersistKey::Soc).await;
        self.state.persisted_soc = stored;

        let restored = match stored {
            Some(soc) => {
                let soc = soc.min(SOC_FULL);
                let drained = match persist::load(&mut self.store, PersistKey::ShutdownHour).await {
                    Some(hour) => persist::power_off_consumption(
                        hour,
                        now_s,
                        self.config.shutdown_current_ua,
                        self.effective_capacity(),
                    ),
                    None => 0,
                };
                if drained > 0 {
                    info!("power-off drain: {} over the last shutdown", drained);
                }
                Some(soc.saturating_sub(drained))
            }
            None => None,
        };

        let chosen = persist::reconcile_restored(restored, fresh);
        if restored.is_some() && chosen != restored {
            warn!("restored soc discarded, too far from fresh estimate");
        }
        if let Some(soc) = chosen {
            self.state.soc_now = soc;
            self.state.soc_real = soc;
            self.state.seeded = true;
        }
        self.state.clamp();
    }

    async fn probe_dead_battery(&mut self) {
        warn!("cell below {} mV, probing with trickle charge", DEAD_BATTERY_MV);
        let primed = self
            .charger
            .set_charge_current_ma(DEAD_PROBE_CURRENT_MA)
            .await
            .is_ok()
            && self.charger.set_enabled(true).await.is_ok();
        if primed {
            self.delay.delay_ms(DEAD_PROBE_SETTLE_MS).await;
        }
        let voltage = self.monitor.read_voltage_mv().await.ok();
        if self
            .charger
            .set_charge_current_ma(self.config.charge_current_ma)
            .await
            .is_err()
        {
            warn!("dead-battery probe: charger rejected charge current");
        }
        if voltage.map_or(true, |mv| mv < DEAD_BATTERY_MV) {
            error!("battery health unknown");
            self.state.health = BatteryHealth::Unknown;
        } else {
            info!("cell recovered under trickle charge");
            self.state.health = BatteryHealth::Good;
        }
    }

    /// Run one estimation pass and return the delay before the next one (s).
    pub async fn tick(&mut self) -> u32 {
        self.tick_with_abort(&AtomicBool::new(false)).await
    }

    /// [`tick`](Self::tick) with an abort flag for the charge step test.
    ///
    /// A raised flag stops an in-flight step test at its next checkpoint;
    /// the rest of the pass still runs.
    pub async fn tick_with_abort(&mut self, abort: &AtomicBool) -> u32 {
        let before = self.state.clone();
        match self.step(abort).await {
            Ok(()) => {
                self.state.last_tick_failed = false;
                self.post_process().await;
            }
            Err(e) => {
                warn!("tick skipped: {}", e);
                let failed = core::mem::replace(&mut self.state, before);
                self.state.skipped_ticks = self.state.skipped_ticks.saturating_add(1);
                self.state.last_tick_failed = true;
                self.keep_calibration(&failed);
            }
        }
        self.state.interval_s = self.state.poll_interval();
        self.state.interval_s
    }

    /// A finished step test survives a failed tick; it is not re-run for the
    /// same band and still authorises the one-shot correction.
    fn keep_calibration(&mut self, failed: &GaugeState) {
        if failed.last_charge_band == self.state.last_charge_band {
            return;
        }
        self.state.last_charge_band = failed.last_charge_band;
        if failed.charge_resistance_mohm != self.state.charge_resistance_mohm {
            self.state.charge_resistance_mohm = failed.charge_resistance_mohm;
            self.state.resistance_override = true;
        }
    }

    async fn step(&mut self, abort: &AtomicBool) -> Result<(), GaugeError> {
        let current = probe_current(&mut self.monitor, &self.config).await?;
        let next = ChargeStatus::from_current(current);
        let previous = self.state.status;
        if self.state.transition(next) {
            info!("status {} -> {}", previous, next);
        }
        self.state.temperature_dc = self
            .monitor
            .read_temperature_decicelsius()
            .await
            .unwrap_or(0);

        if !self.state.seeded {
            let (estimate, _) = self.measure(next).await?;
            self.record(next, &estimate);
            self.state.soc_now = estimate.soc;
            self.state.soc_real = estimate.soc;
            self.state.seeded = true;
            info!("soc seeded from ocv {} mV: {}", estimate.ocv_mv, estimate.soc);
        }

        match next {
            ChargeStatus::Charging => self.charge_step(abort).await,
            ChargeStatus::Discharging => self.discharge_step().await,
            ChargeStatus::NotCharging => self.idle_step().await,
        }
    }

    async fn charge_step(&mut self, abort: &AtomicBool) -> Result<(), GaugeError> {
        if self.state.soc_real >= SOC_FULL {
            self.state.soc_now = self.state.soc_now.saturating_add(NUDGE_STEP).min(SOC_FULL);
            return Ok(());
        }

        let band = self.state.band();
        if self.state.last_charge_band != Some(band) {
            self.calibrate_charge(abort, band).await;
        }

        let (estimate, _) = self.measure(ChargeStatus::Charging).await?;
        self.record(ChargeStatus::Charging, &estimate);
        if !estimate.has_current {
            return Ok(());
        }

        let recalibrated = core::mem::take(&mut self.state.resistance_override);
        self.state.soc_real = constrain_soc_real(
            self.state.soc_real,
            estimate.soc.min(CHARGE_CEILING),
            ChargeStatus::Charging,
            recalibrated,
        );
        let coulomb = coulomb_step(
            estimate.ibatt_avg_ma,
            self.state.interval_s,
            self.effective_capacity(),
        );
        self.state.soc_now = grow_up(self.state.soc_now, self.state.soc_real, coulomb);

        if self.full_power_due(&estimate) {
            self.full_power().await?;
        }
        Ok(())
    }

    async fn calibrate_charge(&mut self, abort: &AtomicBool, band: u32) {
        let result = charge_step_test(
            &mut self.monitor,
            &mut self.charger,
            &mut self.delay,
            &self.config,
            abort,
        )
        .await;
        match result {
            Ok(r) => {
                info!(
                    "charge resistance {} -> {} mOhm",
                    self.state.charge_resistance_mohm, r
                );
                self.state.charge_resistance_mohm = r;
                self.state.resistance_override = true;
                self.state.last_charge_band = Some(band);
            }
            Err(GaugeError::CalibrationAborted) => {
                debug!(
                    "charge calibration aborted, keeping {} mOhm",
                    self.state.charge_resistance_mohm
                );
            }
            Err(e) => {
                warn!("charge calibration failed: {}", e);
                self.state.last_charge_band = Some(band);
            }
        }
    }

    fn full_power_due(&self, estimate: &OcvEstimate) -> bool {
        if estimate.vbatt_avg_mv < self.config.min_over_charge_protect_mv {
            return false;
        }
        if self.config.charge_current_ma > LOW_CHARGE_CURRENT_MA {
            estimate.ibatt_avg_ma < self.config.taper_current_ma
        } else {
            estimate.ocv_mv >= self.config.taper_voltage_mv
        }
    }

    /// Charger off, settle, one OCV sample, advance or reset the dwell timer.
    async fn full_power(&mut self) -> Result<(), GaugeError> {
        let enabled = self
            .charger
            .is_enabled()
            .await
            .map_err(|_| GaugeError::ChargerUnavailable)?;
        if enabled {
            self.set_charger(false).await?;
            self.delay.delay_ms(FULL_POWER_SETTLE_MS).await;
        }
        let ocv = match self.monitor.read_voltage_mv().await {
            Ok(mv) => mv,
            Err(_) => {
                if enabled {
                    // The error is the read failure; the next pass retries the charger.
                    let _ = self.set_charger(true).await;
                }
                return Err(GaugeError::SampleUnavailable);
            }
        };
        self.state.ocv_mv = ocv;

        if ocv < self.config.taper_voltage_mv {
            if self.state.dwell_s > 0 {
                debug!("full-power dwell reset at {} mV", ocv);
            }
            self.state.dwell_s = 0;
            return self.set_charger(true).await;
        }

        self.state.dwell_s = self.state.dwell_s.saturating_add(self.state.interval_s);
        debug!("full-power dwell {} s at {} mV", self.state.dwell_s, ocv);
        if self.state.dwell_s >= FULL_DWELL_S {
            info!("full charge confirmed");
            self.state.soc_real = SOC_FULL;
            self.state.dwell_s = 0;
            self.set_charger(true).await?;
        }
        Ok(())
    }

    async fn idle_step(&mut self) -> Result<(), GaugeError> {
        if self.state.soc_now == 0 || self.state.soc_now >= SOC_FULL {
            return Ok(());
        }
        let (estimate, _) = self.measure(ChargeStatus::NotCharging).await?;
        self.record(ChargeStatus::NotCharging, &estimate);

        if self.state.soc_real >= SOC_FULL {
            self.state.soc_now = self.state.soc_now.saturating_add(NUDGE_STEP).min(SOC_FULL);
            return Ok(());
        }

        let charger_on = self
            .charger
            .is_enabled()
            .await
            .map_err(|_| GaugeError::ChargerUnavailable)?;
        let at_taper = estimate.ocv_mv >= self.config.taper_voltage_mv;
        if charger_on {
            // Charger on but no measurable current: weak adapter, or the
            // settle right after a full-power check.
            self.state.soc_real = estimate.soc.min(CHARGE_CEILING);
            self.state.soc_now = nudge_towards(self.state.soc_now, self.state.soc_real);
            if at_taper {
                self.full_power().await?;
            }
        } else if at_taper || self.state.dwell_s > 0 {
            self.full_power().await?;
        } else {
            self.set_charger(true).await?;
        }
        Ok(())
    }

    async fn discharge_step(&mut self) -> Result<(), GaugeError> {
        let (mut estimate, window) = self.measure(ChargeStatus::Discharging).await?;
        self.record(ChargeStatus::Discharging, &estimate);
        if !estimate.has_current {
            return Ok(());
        }

        let band = self.state.band();
        let plateau =
            self.state.from_full && self.state.lost_capacity_accumulator < PLATEAU_ALLOWANCE;
        let diverged = self.state.soc_now.abs_diff(estimate.soc) > DIVERGENCE_RECAL;
        if self.state.recalibrate_discharge
            || self.state.last_discharge_band != Some(band)
            || diverged
            || plateau
        {
            self.state.recalibrate_discharge = false;
            self.state.last_discharge_band = Some(band);
            let reference = self.table.ocv_for(self.state.soc_now);
            if let Some(r) =
                estimate_discharge(reference, estimate.vbatt_avg_mv, estimate.ibatt_avg_ma)
            {
                if r != self.state.discharge_resistance_mohm {
                    debug!(
                        "discharge resistance {} -> {} mOhm",
                        self.state.discharge_resistance_mohm, r
                    );
                }
                self.state.discharge_resistance_mohm = r;
                self.state.resistance_override = true;
                estimate = self.estimate(ChargeStatus::Discharging, &window);
                self.record(ChargeStatus::Discharging, &estimate);
            }
        }

        let recalibrated = core::mem::take(&mut self.state.resistance_override);
        self.state.soc_real = constrain_soc_real(
            self.state.soc_real,
            estimate.soc,
            ChargeStatus::Discharging,
            recalibrated,
        );
        let drawn = u64::from(estimate.ibatt_avg_ma).saturating_mul(u64::from(self.state.interval_s));
        self.state.discharge_accumulator = self.state.discharge_accumulator.saturating_add(drawn);

        let mut counters = DownCounters {
            low_pwr_cnt: self.state.low_pwr_cnt,
            lost_capacity: self.state.lost_capacity_accumulator,
        };
        let outcome = down_curve_smooth(
            &DownInput {
                proposed: self.state.soc_now,
                soc_real: self.state.soc_real,
                discharge_ma: estimate.ibatt_avg_ma,
                interval_s: self.state.interval_s,
                capacity_mah: self.effective_capacity(),
                vbatt_mv: estimate.vbatt_avg_mv,
                ocv_mv: estimate.ocv_mv,
                ocv_stop_mv: estimate.ocv_stop_mv,
                secondary_terminal_mv: self.config.secondary_terminal_voltage_mv,
                from_full: self.state.from_full,
            },
            &mut counters,
        );
        self.state.low_pwr_cnt = counters.low_pwr_cnt;
        self.state.lost_capacity_accumulator = counters.lost_capacity;
        self.state.soc_now = outcome.committed;

        if outcome.latched {
            info!("empty latch at {} mV", estimate.vbatt_avg_mv);
            self.learn_capacity().await;
        }
        Ok(())
    }

    #[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]
    async fn learn_capacity(&mut self) {
        if !self.state.from_full {
            return;
        }
        let learned = (self.state.discharge_accumulator / 3600).min(u64::from(u32::MAX)) as u32;
        let nominal = self.config.capacity_mah;
        let plausible = learned >= nominal / 2 && u64::from(learned) <= u64::from(nominal) * 3 / 2;
        if !plausible {
            warn!("learned capacity {} mAh rejected", learned);
            return;
        }
        info!("learned capacity {} mAh", learned);
        self.state.real_capacity_mah = learned;
        // Write failures are already logged; the value is kept in RAM.
        let _ = persist::save(&mut self.store, PersistKey::RealCapacity, learned).await;
    }

    async fn post_process(&mut self) {
        self.state.clamp();

        let key = (self.state.soc_show, self.state.temperature_dc, self.state.health);
        if self.state.notified != Some(key) {
            self.state.notified = Some(key);
            let report = BatteryReport::from_state(&self.state);
            trace!("notify {}%", report.percent);
            self.observer.on_change(&report);
        }

        if persist::should_persist(self.state.persisted_soc, self.state.soc_now) {
            self.persist_soc().await;
        }
    }

    async fn persist_soc(&mut self) {
        let soc = self.state.soc_now;
        if persist::save(&mut self.store, PersistKey::Soc, soc).await.is_ok() {
            self.state.persisted_soc = Some(soc);
        }
    }

    async fn set_charger(&mut self, enabled: bool) -> Result<(), GaugeError> {
        self.charger
            .set_enabled(enabled)
            .await
            .map_err(|_| GaugeError::ChargerUnavailable)
    }

    async fn measure(
        &mut self,
        status: ChargeStatus,
    ) -> Result<(OcvEstimate, FilteredWindow), GaugeError> {
        let raw = collect_window(&mut self.monitor, &mut self.delay, &self.config).await?;
        let window = filter_window(&raw)?;
        Ok((self.estimate(status, &window), window))
    }

    fn estimate(&self, status: ChargeStatus, window: &FilteredWindow) -> OcvEstimate {
        compute(
            status,
            window,
            Resistances {
                charge_mohm: self.state.charge_resistance_mohm,
                discharge_mohm: self.state.discharge_resistance_mohm,
            },
            self.config.terminal_voltage_mv,
            &self.table,
        )
    }

    fn record(&mut self, status: ChargeStatus, estimate: &OcvEstimate) {
        let magnitude = i32::try_from(estimate.ibatt_avg_ma).unwrap_or(i32::MAX);
        self.state.ocv_mv = estimate.ocv_mv;
        self.state.ocv_stop_mv = estimate.ocv_stop_mv;
        self.state.vbatt_avg_mv = estimate.vbatt_avg_mv;
        self.state.ibatt_avg_ma = match status {
            ChargeStatus::Charging => magnitude,
            ChargeStatus::Discharging => magnitude.saturating_neg(),
            ChargeStatus::NotCharging => 0,
        };
        self.state.health = if estimate.vbatt_avg_mv < DEAD_BATTERY_MV {
            BatteryHealth::Unknown
        } else {
            BatteryHealth::Good
        };
    }

    fn effective_capacity(&self) -> u32 {
        self.config
            .effective_capacity_mah(self.state.real_capacity_mah)
    }

    /// Record the suspend time and charger state, and flush `soc_now`.
    pub async fn suspend(&mut self, now_s: u64) {
        let charger_on = self.charger.is_enabled().await.unwrap_or(false);
        let charger_active = charger_on || self.state.status == ChargeStatus::Charging;
        self.state.suspended = Some(SuspendRecord {
            at_s: now_s,
            charger_active,
        });
        debug!("suspend at {} s, charger active {}", now_s, charger_active);
        self.persist_soc().await;
    }

    /// Charge drained while suspended.
    ///
    /// Skipped when the charger was active at suspend time or nothing
    /// measurable was drained.
    pub async fn resume(&mut self, now_s: u64) {
        let Some(record) = self.state.suspended.take() else {
            return;
        };
        if record.charger_active {
            debug!("resume: charger was active, no compensation");
            return;
        }
        let elapsed = now_s.saturating_sub(record.at_s);
        let drained = persist::sleep_consumption(
            elapsed,
            self.config.suspend_current_ua,
            self.effective_capacity(),
        );
        if drained == 0 {
            return;
        }
        info!("resume after {} s: soc -{}", elapsed, drained);
        self.state.soc_now = self.state.soc_now.saturating_sub(drained);
        self.post_process().await;
    }

    /// Flush `soc_now` and the shutdown hour before power-off.
    ///
    /// # Errors
    ///
    /// [`GaugeError::PersistenceUnavailable`]
    pub async fn shutdown(&mut self, now_s: u64) -> Result<(), GaugeError> {
        persist::save(&mut self.store, PersistKey::Soc, self.state.soc_now).await?;
        self.state.persisted_soc = Some(self.state.soc_now);
        persist::save(
            &mut self.store,
            PersistKey::ShutdownHour,
            persist::hour_stamp(now_s),
        )
        .await?;
        info!("shutdown flush at soc {}", self.state.soc_now);
        Ok(())
    }

    /// Forget the stored SOC and the learned capacity.
    ///
    /// The next boot estimates from OCV alone.
    ///
    /// # Errors
    ///
    /// [`GaugeError::PersistenceUnavailable`]
    pub async fn reset_learned(&mut self) -> Result<(), GaugeError> {
        persist::clear(&mut self.store, PersistKey::Soc).await?;
        persist::clear(&mut self.store, PersistKey::RealCapacity).await?;
        self.state.persisted_soc = None;
        self.state.real_capacity_mah = 0;
        info!("learned state cleared");
        Ok(())
    }

    /// Displayed percentage, 0..=100
    pub fn soc_percent(&self) -> u8 {
        BatteryReport::from_state(&self.state).percent
    }

    /// Current notification payload
    pub fn report(&self) -> BatteryReport {
        BatteryReport::from_state(&self.state)
    }

    /// Debug dump
    pub fn snapshot(&self) -> GaugeSnapshot {
        GaugeSnapshot::from_state(&self.state)
    }

    /// Read-only view of the state
    pub fn state(&self) -> &GaugeState {
        &self.state
    }

    /// Configuration the gauge was attached with
    pub fn config(&self) -> &GaugeConfig {
        &self.config
    }

    /// Lookup table in use
    pub fn table(&self) -> &OcvSocTable {
        &self.table
    }
}
