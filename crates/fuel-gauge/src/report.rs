//! Outward-facing reports: change notifications and debug dumps.

use core::fmt;

use crate::state::{BatteryHealth, ChargeStatus, GaugeState};

/// Payload delivered to a [`SocObserver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatteryReport {
    /// Displayed percentage, 0..=100
    pub percent: u8,
    /// Health flag; treat `percent` as invalid while `Unknown`
    pub health: BatteryHealth,
    /// Charge direction
    pub status: ChargeStatus,
    /// Battery temperature (0.1 °C), 0 without a thermistor
    pub temperature_dc: i16,
    /// Filtered terminal voltage (mV)
    pub voltage_mv: u32,
    /// Filtered current (mA, positive = charging)
    pub current_ma: i32,
}

impl BatteryReport {
    pub(crate) fn from_state(state: &GaugeState) -> Self {
        Self {
            percent: u8::try_from(state.soc_show.min(100)).unwrap_or(100),
            health: state.health,
            status: state.status,
            temperature_dc: state.temperature_dc,
            voltage_mv: state.vbatt_avg_mv,
            current_ma: state.ibatt_avg_ma,
        }
    }
}

/// Receives a report whenever the displayed percentage, temperature or
/// health changes.
///
/// Called synchronously at the end of a tick, with the gauge lock held.
pub trait SocObserver {
    /// Displayed state changed
    fn on_change(&mut self, report: &BatteryReport);
}

impl<F: FnMut(&BatteryReport)> SocObserver for F {
    fn on_change(&mut self, report: &BatteryReport) {
        self(report)
    }
}

/// Observer that ignores every report
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SocObserver for NullObserver {
    fn on_change(&mut self, _report: &BatteryReport) {}
}

/// Point-in-time dump of the estimator.
///
/// Field meanings match [`GaugeState`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GaugeSnapshot {
    pub status: ChargeStatus,
    pub health: BatteryHealth,
    pub voltage_mv: u32,
    pub current_ma: i32,
    pub charge_resistance_mohm: u32,
    pub discharge_resistance_mohm: u32,
    pub ocv_mv: u32,
    pub ocv_stop_mv: u32,
    pub soc_now: u32,
    pub soc_real: u32,
    pub soc_show: u32,
    pub interval_s: u32,
    pub real_capacity_mah: u32,
    pub dwell_s: u32,
    pub skipped_ticks: u32,
}

impl GaugeSnapshot {
    pub(crate) fn from_state(state: &GaugeState) -> Self {
        Self {
            status: state.status,
            health: state.health,
            voltage_mv: state.vbatt_avg_mv,
            current_ma: state.ibatt_avg_ma,
            charge_resistance_mohm: state.charge_resistance_mohm,
            discharge_resistance_mohm: state.discharge_resistance_mohm,
            ocv_mv: state.ocv_mv,
            ocv_stop_mv: state.ocv_stop_mv,
            soc_now: state.soc_now,
            soc_real: state.soc_real,
            soc_show: state.soc_show,
            interval_s: state.interval_s,
            real_capacity_mah: state.real_capacity_mah,
            dwell_s: state.dwell_s,
            skipped_ticks: state.skipped_ticks,
        }
    }
}

impl fmt::Display for GaugeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "status:      {} ({})", self.status, self.health)?;
        writeln!(f, "vbatt:       {} mV", self.voltage_mv)?;
        writeln!(f, "ibatt:       {} mA", self.current_ma)?;
        writeln!(
            f,
            "resistance:  charge {} mOhm, discharge {} mOhm",
            self.charge_resistance_mohm, self.discharge_resistance_mohm
        )?;
        writeln!(f, "ocv:         {} mV (stop {} mV)", self.ocv_mv, self.ocv_stop_mv)?;
        writeln!(
            f,
            "soc:         now {} real {} show {}%",
            self.soc_now, self.soc_real, self.soc_show
        )?;
        writeln!(f, "interval:    {} s", self.interval_s)?;
        writeln!(f, "capacity:    {} mAh learned", self.real_capacity_mah)?;
        writeln!(f, "dwell:       {} s", self.dwell_s)?;
        write!(f, "skipped:     {}", self.skipped_ticks)
    }
}
