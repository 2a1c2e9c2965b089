//! OCV → state-of-charge lookup table.
//!
//! The table holds 100 breakpoints, one per percent, with the open-circuit
//! voltage strictly increasing. Lookup is piecewise-linear and never
//! extrapolates outside `0..=SOC_FULL`.
//!
//! The top bracket is special. When the last breakpoint is the 100 % entry,
//! anything at or above it saturates. When it is not (a table that stops
//! short of full), the configured taper voltage stands in as a synthetic
//! 100 % breakpoint and the last bracket interpolates towards it.

use crate::config::{OcvChunks, OCV_CHUNKS, OCV_CHUNK_LEN};
use crate::{ConfigField, GaugeError, SOC_FULL};

/// Number of breakpoints in every table
pub const OCV_TABLE_LEN: usize = OCV_CHUNKS * OCV_CHUNK_LEN;

/// Thousandths of a percent per table row
const SOC_PER_ROW: u32 = SOC_FULL / OCV_TABLE_LEN as u32;

/// Built-in curve for the stock 1S Li-ion pack, row `k` is `(k + 1)` %.
#[rustfmt::skip]
pub const DEFAULT_OCV_MV: [u32; OCV_TABLE_LEN] = [
    3480, 3515, 3550, 3585, 3620, 3632, 3644, 3656, 3668, 3680,
    3684, 3688, 3692, 3696, 3700, 3704, 3707, 3711, 3714, 3718,
    3721, 3723, 3726, 3729, 3732, 3734, 3737, 3740, 3742, 3745,
    3748, 3750, 3752, 3755, 3758, 3760, 3762, 3765, 3768, 3770,
    3773, 3776, 3779, 3782, 3785, 3788, 3791, 3794, 3797, 3800,
    3804, 3809, 3814, 3818, 3822, 3827, 3832, 3836, 3840, 3845,
    3851, 3857, 3863, 3869, 3875, 3881, 3887, 3893, 3899, 3905,
    3912, 3919, 3926, 3933, 3940, 3947, 3954, 3961, 3968, 3975,
    3984, 3992, 4000, 4009, 4018, 4026, 4034, 4043, 4052, 4060,
    4070, 4080, 4090, 4100, 4110, 4124, 4138, 4152, 4166, 4180,
];

/// One `(ocv, soc)` breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Breakpoint {
    /// Open-circuit voltage (mV)
    pub ocv_mv: u32,
    /// State of charge (thousandths of a percent)
    pub soc: u32,
}

/// Monotone OCV → SOC table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcvSocTable {
    points: [Breakpoint; OCV_TABLE_LEN],
    taper_mv: u32,
}

impl OcvSocTable {
    /// Table built from the stock curve
    pub fn builtin(taper_mv: u32) -> Self {
        Self::from_ocv_rows(&DEFAULT_OCV_MV, taper_mv)
    }

    /// Table built from a complete 10×10 chunked override.
    ///
    /// # Errors
    ///
    /// [`GaugeError::ConfigInvalid`] when the voltages are not strictly
    /// increasing.
    pub fn from_chunks(chunks: &OcvChunks, taper_mv: u32) -> Result<Self, GaugeError> {
        let mut rows = [0u32; OCV_TABLE_LEN];
        for (row, ocv) in rows.iter_mut().zip(chunks.iter().flatten()) {
            *row = *ocv;
        }
        if !rows.windows(2).all(|w| matches!(w, [a, b] if a < b)) {
            return Err(GaugeError::ConfigInvalid(ConfigField::OcvTable));
        }
        Ok(Self::from_ocv_rows(&rows, taper_mv))
    }

    fn from_ocv_rows(rows: &[u32; OCV_TABLE_LEN], taper_mv: u32) -> Self {
        let mut points = [Breakpoint { ocv_mv: 0, soc: 0 }; OCV_TABLE_LEN];
        let mut soc = 0u32;
        for (point, ocv) in points.iter_mut().zip(rows.iter()) {
            soc = soc.saturating_add(SOC_PER_ROW);
            *point = Breakpoint { ocv_mv: *ocv, soc };
        }
        Self { points, taper_mv }
    }

    /// Breakpoints, lowest voltage first
    pub fn points(&self) -> &[Breakpoint; OCV_TABLE_LEN] {
        &self.points
    }

    /// Map an open-circuit voltage to a state of charge.
    pub fn lookup(&self, ocv_mv: u32) -> u32 {
        let Some(first) = self.points.first() else {
            return 0;
        };
        if ocv_mv < first.ocv_mv {
            return 0;
        }
        // Scan from the top so that the first bracket whose lower edge is
        // at or below the voltage wins.
        let last_index = OCV_TABLE_LEN.saturating_sub(1);
        for (i, lo) in self.points.iter().enumerate().rev() {
            if ocv_mv < lo.ocv_mv {
                continue;
            }
            if i == last_index {
                return self.top_bracket(*lo, ocv_mv);
            }
            return match self.points.get(i.saturating_add(1)) {
                Some(hi) => interpolate(*lo, *hi, ocv_mv),
                None => lo.soc,
            };
        }
        0
    }

    fn top_bracket(&self, top: Breakpoint, ocv_mv: u32) -> u32 {
        if top.soc >= SOC_FULL || self.taper_mv <= top.ocv_mv || ocv_mv >= self.taper_mv {
            return SOC_FULL;
        }
        let ceiling = Breakpoint {
            ocv_mv: self.taper_mv,
            soc: SOC_FULL,
        };
        interpolate(top, ceiling, ocv_mv)
    }

    /// Inverse lookup: the open-circuit voltage the table expects at `soc`.
    ///
    /// Used as the reference when calibrating discharge resistance against
    /// the committed estimate. Saturates at the first and last breakpoints.
    pub fn ocv_for(&self, soc: u32) -> u32 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0;
        };
        if soc <= first.soc {
            return first.ocv_mv;
        }
        if soc >= last.soc {
            return last.ocv_mv;
        }
        self.points
            .windows(2)
            .find_map(|w| match w {
                [lo, hi] if soc >= lo.soc && soc < hi.soc => Some(interpolate_ocv(*lo, *hi, soc)),
                _ => None,
            })
            .unwrap_or(last.ocv_mv)
    }
}

#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]
fn interpolate(lo: Breakpoint, hi: Breakpoint, ocv_mv: u32) -> u32 {
    let span_mv = u64::from(hi.ocv_mv.saturating_sub(lo.ocv_mv));
    if span_mv == 0 {
        return lo.soc;
    }
    let rise = u64::from(ocv_mv.saturating_sub(lo.ocv_mv)).min(span_mv);
    let soc_span = u64::from(hi.soc.saturating_sub(lo.soc));
    lo.soc + (rise * soc_span / span_mv) as u32
}

#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]
fn interpolate_ocv(lo: Breakpoint, hi: Breakpoint, soc: u32) -> u32 {
    let soc_span = u64::from(hi.soc.saturating_sub(lo.soc));
    if soc_span == 0 {
        return lo.ocv_mv;
    }
    let rise = u64::from(soc.saturating_sub(lo.soc));
    let span_mv = u64::from(hi.ocv_mv.saturating_sub(lo.ocv_mv));
    lo.ocv_mv + (rise * span_mv / soc_span) as u32
}
