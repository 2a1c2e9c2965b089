//! Rate limiting of the internal estimate.
//!
//! `soc_now` never jumps to the table value. While discharging it walks down
//! by a Coulomb-counted step, and while charging it walks up towards
//! `soc_real`. Everything here is pure; the caller owns the state.

use crate::SOC_FULL;

/// Consecutive near-empty ticks before the empty latch fires
pub const LOW_POWER_LATCH_TICKS: u8 = 5;
/// Ordinary down steps never take `soc_now` below this
pub const DOWN_STEP_FLOOR: u32 = 1_000;
/// Discharge suppressed after a full charge, in SOC units
pub const PLATEAU_ALLOWANCE: u32 = 1_000;
/// `soc_now` ahead of `soc_real` by more than this doubles the down step
pub const CATCH_UP_GAP: u32 = 5_000;
/// Fixed nudge used by the trickle, grow-up and weak-adapter paths
pub const NUDGE_STEP: u32 = 500;

/// SOC change for `current_ma` flowing for `interval_s` seconds.
///
/// `current · t · 1000 / 36 / capacity`, truncating at each step.
#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]
pub fn coulomb_step(current_ma: u32, interval_s: u32, capacity_mah: u32) -> u32 {
    if capacity_mah == 0 {
        return 0;
    }
    let charge = u64::from(current_ma) * u64::from(interval_s) * 1000 / 36;
    (charge / u64::from(capacity_mah)).min(u64::from(SOC_FULL)) as u32
}

/// Inputs of one discharge smoothing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownInput {
    /// Current `soc_now`
    pub proposed: u32,
    /// Constrained table value
    pub soc_real: u32,
    /// Discharge current magnitude (mA); 0 when no sample was negative
    pub discharge_ma: u32,
    /// Seconds since the previous tick
    pub interval_s: u32,
    /// Learned or nominal capacity (mAh)
    pub capacity_mah: u32,
    /// Filtered terminal voltage (mV)
    pub vbatt_mv: u32,
    /// Open-circuit voltage (mV)
    pub ocv_mv: u32,
    /// OCV at which the loaded terminal voltage reaches the stop voltage (mV)
    pub ocv_stop_mv: u32,
    /// Hard cutoff (mV)
    pub secondary_terminal_mv: u32,
    /// Discharge began at 100 %
    pub from_full: bool,
}

/// Counters carried between smoothing steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownCounters {
    /// Consecutive near-empty ticks
    pub low_pwr_cnt: u8,
    /// SOC consumed on the post-full plateau
    pub lost_capacity: u32,
}

/// Result of one smoothing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownOutcome {
    /// New `soc_now`
    pub committed: u32,
    /// The empty latch fired this tick
    pub latched: bool,
}

/// Discharge smoothing.
///
/// In priority order: no current means no step; five near-empty ticks latch
/// the estimate to the bottom; the post-full plateau swallows the first
/// [`PLATEAU_ALLOWANCE`]; a large lead over `soc_real` doubles the step; and
/// ordinary steps stop at [`DOWN_STEP_FLOOR`].
pub fn down_curve_smooth(input: &DownInput, counters: &mut DownCounters) -> DownOutcome {
    let mut step = if input.discharge_ma == 0 {
        0
    } else {
        coulomb_step(input.discharge_ma, input.interval_s, input.capacity_mah)
    };

    if input.vbatt_mv < input.secondary_terminal_mv {
        counters.low_pwr_cnt = LOW_POWER_LATCH_TICKS;
    } else if input.ocv_mv <= input.ocv_stop_mv {
        counters.low_pwr_cnt = counters.low_pwr_cnt.saturating_add(1);
    } else {
        counters.low_pwr_cnt = 0;
    }

    if counters.low_pwr_cnt >= LOW_POWER_LATCH_TICKS {
        counters.low_pwr_cnt = 0;
        let latch_step = input.proposed.saturating_sub(1);
        return DownOutcome {
            committed: input.proposed.saturating_sub(latch_step),
            latched: true,
        };
    }

    if input.from_full && counters.lost_capacity < PLATEAU_ALLOWANCE {
        counters.lost_capacity = counters.lost_capacity.saturating_add(step);
        step = 0;
    }

    if input.proposed > input.soc_real.saturating_add(CATCH_UP_GAP) {
        step = step.saturating_mul(2);
    }

    step = step.min(input.proposed.saturating_sub(DOWN_STEP_FLOOR));
    DownOutcome {
        committed: input.proposed.saturating_sub(step),
        latched: false,
    }
}

/// Charging convergence: move `soc_now` up towards `soc_real`.
///
/// The step is the Coulomb step or the nudge, whichever is larger, and
/// never overshoots `soc_real`. Nothing moves when `soc_now` is already at
/// or above it.
pub fn grow_up(soc_now: u32, soc_real: u32, coulomb: u32) -> u32 {
    if soc_now >= soc_real {
        return soc_now;
    }
    let gap = soc_real.saturating_sub(soc_now);
    let step = coulomb.max(NUDGE_STEP.min(gap));
    soc_now.saturating_add(step).min(soc_real)
}

/// Move `soc_now` one nudge towards `target` without overshooting.
pub fn nudge_towards(soc_now: u32, target: u32) -> u32 {
    if soc_now < target {
        soc_now.saturating_add(NUDGE_STEP).min(target)
    } else {
        soc_now.saturating_sub(NUDGE_STEP).max(target)
    }
}
