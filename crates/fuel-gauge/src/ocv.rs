//! Terminal voltage → open-circuit voltage → state of charge.

use crate::filter::{FilteredWindow, Sample};
use crate::state::ChargeStatus;
use crate::table::OcvSocTable;

/// Margin above the terminal voltage that counts as "near empty" (mV)
pub const STOP_MARGIN_MV: u32 = 50;

/// Output of one OCV computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OcvEstimate {
    /// Open-circuit voltage (mV)
    pub ocv_mv: u32,
    /// OCV at which the loaded terminal voltage falls to terminal + margin (mV)
    pub ocv_stop_mv: u32,
    /// Averaged terminal voltage (mV)
    pub vbatt_avg_mv: u32,
    /// Averaged current magnitude in the direction of `status` (mA)
    pub ibatt_avg_ma: u32,
    /// Table lookup of `ocv_mv`
    pub soc: u32,
    /// At least one sample carried current in the expected direction
    pub has_current: bool,
}

/// Resistances used for the IR correction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resistances {
    /// Charge path (mΩ)
    pub charge_mohm: u32,
    /// Discharge path (mΩ)
    pub discharge_mohm: u32,
}

/// Compute OCV and the candidate SOC for one filtered window.
#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]
pub fn compute(
    status: ChargeStatus,
    window: &FilteredWindow,
    resistances: Resistances,
    terminal_mv: u32,
    table: &OcvSocTable,
) -> OcvEstimate {
    let base_stop = terminal_mv.saturating_add(STOP_MARGIN_MV);
    let at_rest = |voltage_mv: u32| OcvEstimate {
        ocv_mv: voltage_mv,
        ocv_stop_mv: base_stop,
        vbatt_avg_mv: voltage_mv,
        ibatt_avg_ma: 0,
        soc: table.lookup(voltage_mv),
        has_current: false,
    };

    match status {
        ChargeStatus::NotCharging => at_rest(window.voltage_mv),
        ChargeStatus::Charging => {
            let Some((v, i)) = directional_average(&window.retained, |s| s.current_ma > 0) else {
                return at_rest(window.voltage_mv);
            };
            let drop = (u64::from(i) * u64::from(resistances.charge_mohm) / 1000) as u32;
            let ocv_mv = v.saturating_sub(drop);
            OcvEstimate {
                ocv_mv,
                ocv_stop_mv: base_stop,
                vbatt_avg_mv: v,
                ibatt_avg_ma: i,
                soc: table.lookup(ocv_mv),
                has_current: true,
            }
        }
        ChargeStatus::Discharging => {
            let Some((v, i)) = directional_average(&window.retained, |s| s.current_ma < 0) else {
                return at_rest(window.voltage_mv);
            };
            let rise = (u64::from(i) * u64::from(resistances.discharge_mohm) / 1000) as u32;
            let ocv_mv = v.saturating_add(rise);
            OcvEstimate {
                ocv_mv,
                ocv_stop_mv: base_stop.saturating_add(rise),
                vbatt_avg_mv: v,
                ibatt_avg_ma: i,
                soc: table.lookup(ocv_mv),
                has_current: true,
            }
        }
    }
}

/// Average voltage and current magnitude over the samples matching `keep`.
#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]
fn directional_average(samples: &[Sample], keep: impl Fn(&Sample) -> bool) -> Option<(u32, u32)> {
    let (mut v_sum, mut i_sum, mut count) = (0u64, 0u64, 0u64);
    for s in samples.iter().filter(|s| keep(s)) {
        v_sum += u64::from(s.voltage_mv);
        i_sum += u64::from(s.current_ma.unsigned_abs());
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(((v_sum / count) as u32, (i_sum / count) as u32))
}

/// Apply the per-state direction constraint to a new `soc_real` candidate.
///
/// While charging `soc_real` may only rise, while discharging it may only
/// fall. `recalibrated` lifts the constraint for one tick after a
/// resistance change.
pub fn constrain_soc_real(
    previous: u32,
    candidate: u32,
    status: ChargeStatus,
    recalibrated: bool,
) -> u32 {
    if recalibrated {
        return candidate;
    }
    match status {
        ChargeStatus::Charging => previous.max(candidate),
        ChargeStatus::Discharging => previous.min(candidate),
        ChargeStatus::NotCharging => candidate,
    }
}
