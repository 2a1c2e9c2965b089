//! Mutable gauge state.
//!
//! [`GaugeState`] is owned by the [`Gauge`](crate::Gauge) and only ever
//! mutated by a tick or by the suspend/resume hooks.

use crate::resistance::{DEFAULT_CHARGE_RESISTANCE_MOHM, DEFAULT_DISCHARGE_RESISTANCE_MOHM};
use crate::SOC_FULL;

/// Seconds between ticks unless something more urgent is going on
pub const DEFAULT_INTERVAL_S: u32 = 5;
/// Interval while the full-power dwell timer runs, or after a skipped tick
pub const FAST_INTERVAL_S: u32 = 2;
/// Interval close to empty or full
pub const EDGE_INTERVAL_S: u32 = 3;
/// Interval when idle at a saturated SOC
pub const IDLE_INTERVAL_S: u32 = 10;

/// SOC within this distance of 0 or 100 % polls faster
pub const EDGE_BAND: u32 = 5_000;

/// Charge direction, derived from the sign of the battery current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChargeStatus {
    /// Current flows into the cell
    Charging,
    /// Current flows out of the cell
    Discharging,
    /// Current inside the noise floor
    #[default]
    NotCharging,
}

impl ChargeStatus {
    /// Status implied by a noise-clamped current reading
    pub fn from_current(current_ma: i32) -> Self {
        match current_ma.signum() {
            1 => Self::Charging,
            -1 => Self::Discharging,
            _ => Self::NotCharging,
        }
    }

    /// Short label for logs and dumps
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Charging => "charging",
            Self::Discharging => "discharging",
            Self::NotCharging => "not-charging",
        }
    }
}

impl core::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Battery health as far as the gauge can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BatteryHealth {
    /// Voltage plausible
    #[default]
    Good,
    /// Voltage implausibly low; the percentage should not be trusted
    Unknown,
}

impl core::fmt::Display for BatteryHealth {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Good => "good",
            Self::Unknown => "unknown",
        })
    }
}

/// Suspend bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendRecord {
    /// Wall-clock time of the suspend (s)
    pub at_s: u64,
    /// Charger was active when the system went down
    pub charger_active: bool,
}

/// Estimator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeState {
    /// Charge direction seen by the last tick
    pub status: ChargeStatus,
    /// Health flag
    pub health: BatteryHealth,
    /// Rate-limited internal estimate
    pub soc_now: u32,
    /// Latest direction-constrained table lookup
    pub soc_real: u32,
    /// Displayed percent, `soc_now / 1000`
    pub soc_show: u32,
    /// Last open-circuit voltage (mV)
    pub ocv_mv: u32,
    /// Last safe-stop voltage (mV)
    pub ocv_stop_mv: u32,
    /// Charge-path resistance (mΩ)
    pub charge_resistance_mohm: u32,
    /// Discharge-path resistance (mΩ)
    pub discharge_resistance_mohm: u32,
    /// Last filtered terminal voltage (mV)
    pub vbatt_avg_mv: u32,
    /// Last filtered current (mA, positive = charging)
    pub ibatt_avg_ma: i32,
    /// Consecutive near-empty ticks
    pub low_pwr_cnt: u8,
    /// Charge drawn since discharging began (mA·s)
    pub discharge_accumulator: u64,
    /// SOC consumed on the post-full plateau
    pub lost_capacity_accumulator: u32,
    /// Seconds until the next tick
    pub interval_s: u32,
    /// Learned capacity (mAh), 0 until learned
    pub real_capacity_mah: u32,
    /// Full-power dwell timer (s)
    pub dwell_s: u32,
    /// Battery temperature (0.1 °C)
    pub temperature_dc: i16,
    /// Ticks skipped because of errors
    pub skipped_ticks: u32,

    pub(crate) from_full: bool,
    pub(crate) recalibrate_discharge: bool,
    pub(crate) resistance_override: bool,
    pub(crate) last_charge_band: Option<u32>,
    pub(crate) last_discharge_band: Option<u32>,
    pub(crate) last_tick_failed: bool,
    pub(crate) seeded: bool,
    pub(crate) persisted_soc: Option<u32>,
    pub(crate) notified: Option<(u32, i16, BatteryHealth)>,
    pub(crate) suspended: Option<SuspendRecord>,
}

impl Default for GaugeState {
    fn default() -> Self {
        Self {
            status: ChargeStatus::NotCharging,
            health: BatteryHealth::Good,
            soc_now: 0,
            soc_real: 0,
            soc_show: 0,
            ocv_mv: 0,
            ocv_stop_mv: 0,
            charge_resistance_mohm: DEFAULT_CHARGE_RESISTANCE_MOHM,
            discharge_resistance_mohm: DEFAULT_DISCHARGE_RESISTANCE_MOHM,
            vbatt_avg_mv: 0,
            ibatt_avg_ma: 0,
            low_pwr_cnt: 0,
            discharge_accumulator: 0,
            lost_capacity_accumulator: 0,
            interval_s: DEFAULT_INTERVAL_S,
            real_capacity_mah: 0,
            dwell_s: 0,
            temperature_dc: 0,
            skipped_ticks: 0,
            from_full: false,
            recalibrate_discharge: false,
            resistance_override: false,
            last_charge_band: None,
            last_discharge_band: None,
            last_tick_failed: false,
            seeded: false,
            persisted_soc: None,
            notified: None,
            suspended: None,
        }
    }
}

impl GaugeState {
    /// Switch to `next`, resetting the per-session counters.
    ///
    /// Returns `true` when the status actually changed.
    pub fn transition(&mut self, next: ChargeStatus) -> bool {
        if next == self.status {
            return false;
        }
        self.status = next;
        self.low_pwr_cnt = 0;
        self.lost_capacity_accumulator = 0;
        self.discharge_accumulator = 0;
        self.resistance_override = false;
        if next == ChargeStatus::Discharging {
            self.enter_discharge();
        }
        true
    }

    /// Arm the bookkeeping for a fresh discharge session.
    pub(crate) fn enter_discharge(&mut self) {
        self.recalibrate_discharge = true;
        self.from_full = self.soc_now >= SOC_FULL;
        self.dwell_s = 0;
        self.last_discharge_band = None;
    }

    /// Clamp `soc_now` and derive `soc_show`.
    pub fn clamp(&mut self) {
        self.soc_now = self.soc_now.min(SOC_FULL);
        self.soc_real = self.soc_real.min(SOC_FULL);
        self.soc_show = self.soc_now / 1000;
    }

    /// Five-percent band of the displayed SOC
    pub fn band(&self) -> u32 {
        self.soc_show / 5
    }

    /// Pick the delay before the next tick.
    pub fn poll_interval(&self) -> u32 {
        if self.dwell_s > 0 || self.last_tick_failed {
            return FAST_INTERVAL_S;
        }
        let saturated = self.soc_now == 0 || self.soc_now >= SOC_FULL;
        if self.status == ChargeStatus::NotCharging && saturated {
            return IDLE_INTERVAL_S;
        }
        if self.soc_now <= EDGE_BAND || self.soc_now >= SOC_FULL.saturating_sub(EDGE_BAND) {
            return EDGE_INTERVAL_S;
        }
        DEFAULT_INTERVAL_S
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(status: ChargeStatus, soc_now: u32) -> GaugeState {
        GaugeState {
            status,
            soc_now,
            ..GaugeState::default()
        }
    }

    #[test]
    fn test_status_from_current_sign() {
        assert_eq!(ChargeStatus::from_current(120), ChargeStatus::Charging);
        assert_eq!(ChargeStatus::from_current(-1), ChargeStatus::Discharging);
        assert_eq!(ChargeStatus::from_current(0), ChargeStatus::NotCharging);
    }

    #[test]
    fn test_poll_interval_rules() {
        assert_eq!(at(ChargeStatus::Discharging, 50_000).poll_interval(), 5);
        assert_eq!(at(ChargeStatus::Discharging, 5_000).poll_interval(), 3);
        assert_eq!(at(ChargeStatus::Charging, 95_000).poll_interval(), 3);
        assert_eq!(at(ChargeStatus::NotCharging, SOC_FULL).poll_interval(), 10);
        assert_eq!(at(ChargeStatus::NotCharging, 0).poll_interval(), 10);

        let mut dwelling = at(ChargeStatus::NotCharging, SOC_FULL);
        dwelling.dwell_s = 2;
        assert_eq!(dwelling.poll_interval(), 2);

        let mut failed = at(ChargeStatus::Discharging, 50_000);
        failed.last_tick_failed = true;
        assert_eq!(failed.poll_interval(), 2);
    }

    #[test]
    fn test_transition_resets_counters() {
        let mut state = at(ChargeStatus::Charging, SOC_FULL);
        state.low_pwr_cnt = 3;
        state.discharge_accumulator = 900;
        state.lost_capacity_accumulator = 40;
        state.dwell_s = 30;

        assert!(state.transition(ChargeStatus::Discharging));
        assert_eq!(state.low_pwr_cnt, 0);
        assert_eq!(state.discharge_accumulator, 0);
        assert_eq!(state.lost_capacity_accumulator, 0);
        assert_eq!(state.dwell_s, 0);
        assert!(state.recalibrate_discharge);
        assert!(state.from_full);

        assert!(!state.transition(ChargeStatus::Discharging));
    }

    #[test]
    fn test_charging_to_idle_keeps_dwell() {
        let mut state = at(ChargeStatus::Charging, 99_000);
        state.dwell_s = 20;
        assert!(state.transition(ChargeStatus::NotCharging));
        assert_eq!(state.dwell_s, 20);
    }

    #[test]
    fn test_clamp_derives_show() {
        let mut state = at(ChargeStatus::Discharging, 19_830);
        state.clamp();
        assert_eq!(state.soc_show, 19);
        state.soc_now = 250_000;
        state.clamp();
        assert_eq!(state.soc_now, SOC_FULL);
        assert_eq!(state.soc_show, 100);
    }
}
