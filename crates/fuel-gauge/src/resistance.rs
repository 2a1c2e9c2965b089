//! Online internal-resistance estimation.
//!
//! Discharge resistance is derived from the gap between the OCV the table
//! expects at the current estimate and the loaded terminal voltage. Charge
//! resistance needs a step test: the charger is driven at two known currents
//! and `R = ΔV / ΔI`.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal_async::delay::DelayNs;
use platform::{BatteryMonitor, ChargerControl};

use crate::config::GaugeConfig;
use crate::filter::{collect_window, filter_window};
use crate::GaugeError;

/// Charge-path resistance before the first step test (mΩ)
pub const DEFAULT_CHARGE_RESISTANCE_MOHM: u32 = 150;
/// Discharge-path resistance before the first calibration (mΩ)
pub const DEFAULT_DISCHARGE_RESISTANCE_MOHM: u32 = 250;

/// Lower bound of the discharge resistance (mΩ)
pub const DISCHARGE_RESISTANCE_MIN_MOHM: u32 = 80;
/// Upper bound of both resistances (mΩ)
pub const RESISTANCE_MAX_MOHM: u32 = 500;

/// Discharge currents at or below this do not give a usable estimate (mA)
pub const MIN_CALIBRATION_CURRENT_MA: u32 = 100;

/// Step-test currents, high then low (mA)
pub const STEP_CURRENTS_MA: [u32; 2] = [500, 100];

/// Settle time after each step-test current change
pub const STEP_SETTLE_MS: u32 = 1500;

/// One step-test operating point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepPoint {
    /// Filtered terminal voltage (mV)
    pub voltage_mv: u32,
    /// Filtered charge current (mA)
    pub current_ma: i32,
}

/// Discharge resistance from an OCV reference and a loaded sample.
///
/// Returns `None` when the discharge current is too small to trust; the
/// caller keeps its previous value.
#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]
pub fn estimate_discharge(ocv_reference_mv: u32, voltage_mv: u32, discharge_ma: u32) -> Option<u32> {
    if discharge_ma <= MIN_CALIBRATION_CURRENT_MA {
        return None;
    }
    let drop = u64::from(ocv_reference_mv.saturating_sub(voltage_mv));
    let r = (drop * 1000 / u64::from(discharge_ma)).min(u64::from(u32::MAX)) as u32;
    Some(r.clamp(DISCHARGE_RESISTANCE_MIN_MOHM, RESISTANCE_MAX_MOHM))
}

/// Charge resistance from the two step-test points.
///
/// # Errors
///
/// [`GaugeError::ResistanceCalibrationInconclusive`] unless the high point
/// is strictly above the low point on both axes.
#[allow(
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn charge_resistance_from_step(hi: StepPoint, lo: StepPoint) -> Result<u32, GaugeError> {
    if hi.voltage_mv <= lo.voltage_mv || hi.current_ma <= lo.current_ma {
        return Err(GaugeError::ResistanceCalibrationInconclusive);
    }
    let dv = u64::from(hi.voltage_mv - lo.voltage_mv);
    let di = (i64::from(hi.current_ma) - i64::from(lo.current_ma)) as u64;
    let r = (1000 * dv / di).min(u64::from(RESISTANCE_MAX_MOHM)) as u32;
    Ok(r)
}

/// Run the charge-path step test and return the new resistance.
///
/// The abort flag is checked after every settle delay; once raised the test
/// stops at the next checkpoint. The programmed charge current is restored
/// whatever the outcome.
///
/// # Errors
///
/// - [`GaugeError::CalibrationAborted`] when `abort` was raised
/// - [`GaugeError::ResistanceCalibrationInconclusive`] on a non-monotone pair
/// - [`GaugeError::ChargerUnavailable`] / [`GaugeError::SampleUnavailable`] /
///   [`GaugeError::NoStableSample`] on I/O trouble
pub async fn charge_step_test<M, C, D>(
    monitor: &mut M,
    charger: &mut C,
    delay: &mut D,
    config: &GaugeConfig,
    abort: &AtomicBool,
) -> Result<u32, GaugeError>
where
    M: BatteryMonitor,
    C: ChargerControl,
    D: DelayNs,
{
    let outcome = run_steps(monitor, charger, delay, config, abort).await;
    let restored = charger
        .set_charge_current_ma(config.charge_current_ma)
        .await
        .map_err(|_| GaugeError::ChargerUnavailable);
    let r = outcome?;
    restored?;
    Ok(r)
}

async fn run_steps<M, C, D>(
    monitor: &mut M,
    charger: &mut C,
    delay: &mut D,
    config: &GaugeConfig,
    abort: &AtomicBool,
) -> Result<u32, GaugeError>
where
    M: BatteryMonitor,
    C: ChargerControl,
    D: DelayNs,
{
    let [hi_ma, lo_ma] = STEP_CURRENTS_MA;
    let hi = measure_at(monitor, charger, delay, config, abort, hi_ma).await?;
    let lo = measure_at(monitor, charger, delay, config, abort, lo_ma).await?;
    let r = charge_resistance_from_step(hi, lo)?;
    debug!(
        "step test: {} mV @ {} mA, {} mV @ {} mA -> {} mOhm",
        hi.voltage_mv,
        hi.current_ma,
        lo.voltage_mv,
        lo.current_ma,
        r
    );
    Ok(r)
}

async fn measure_at<M, C, D>(
    monitor: &mut M,
    charger: &mut C,
    delay: &mut D,
    config: &GaugeConfig,
    abort: &AtomicBool,
    current_ma: u32,
) -> Result<StepPoint, GaugeError>
where
    M: BatteryMonitor,
    C: ChargerControl,
    D: DelayNs,
{
    charger
        .set_charge_current_ma(current_ma)
        .await
        .map_err(|_| GaugeError::ChargerUnavailable)?;
    delay.delay_ms(STEP_SETTLE_MS).await;
    if abort.load(Ordering::Acquire) {
        return Err(GaugeError::CalibrationAborted);
    }
    let window = collect_window(monitor, delay, config).await?;
    let filtered = filter_window(&window)?;
    Ok(StepPoint {
        voltage_mv: filtered.voltage_mv,
        current_ma: filtered.current_ma,
    })
}
