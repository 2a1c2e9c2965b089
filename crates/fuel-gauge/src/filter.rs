//! Sample window and mean-with-rejection filter.
//!
//! A window is `sample_group_size` interleaved voltage/current reads taken
//! [`INTER_SAMPLE_DELAY_MS`] apart. Each channel is averaged, samples that
//! sit too far from the average are dropped, and the survivors are averaged
//! again. A channel that loses a third or more of its samples fails the
//! whole window.

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use platform::BatteryMonitor;

use crate::config::{GaugeConfig, MAX_SAMPLE_GROUP};
use crate::GaugeError;

/// Delay between two reads of one window
pub const INTER_SAMPLE_DELAY_MS: u32 = 10;

/// Current samples further than this from the mean are rejected (mA)
pub const CURRENT_REJECT_MA: i64 = 100;

/// Voltage samples further than this from the mean are rejected (mV)
pub const VOLTAGE_REJECT_MV: i64 = 20;

/// One voltage/current read pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    /// Terminal voltage (mV)
    pub voltage_mv: u32,
    /// Battery current (mA, positive = charging), noise floor applied
    pub current_ma: i32,
}

/// Raw window, at most [`MAX_SAMPLE_GROUP`] samples
pub type SampleWindow = Vec<Sample, MAX_SAMPLE_GROUP>;

/// Result of filtering one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredWindow {
    /// Filtered voltage (mV)
    pub voltage_mv: u32,
    /// Filtered current (mA)
    pub current_ma: i32,
    /// Samples that survived rejection on both channels
    pub retained: SampleWindow,
}

/// Force readings inside the noise floor to exactly zero.
pub fn clamp_noise(current_ma: i32, charge_floor_ma: u32, discharge_floor_ma: u32) -> i32 {
    let magnitude = current_ma.unsigned_abs();
    if current_ma > 0 && magnitude < charge_floor_ma {
        return 0;
    }
    if current_ma < 0 && magnitude < discharge_floor_ma {
        return 0;
    }
    current_ma
}

/// Read one current sample with the noise floor applied.
///
/// This is the cheap status probe: one read, no filtering.
///
/// # Errors
///
/// [`GaugeError::SampleUnavailable`] when the read fails.
pub async fn probe_current<M: BatteryMonitor>(
    monitor: &mut M,
    config: &GaugeConfig,
) -> Result<i32, GaugeError> {
    let raw = monitor
        .read_current_ma()
        .await
        .map_err(|_| GaugeError::SampleUnavailable)?;
    Ok(clamp_noise(
        raw,
        config.charge_noise_floor_ma,
        config.discharge_noise_floor_ma,
    ))
}

/// Collect one window of `config.sample_group_size` samples.
///
/// # Errors
///
/// [`GaugeError::SampleUnavailable`] as soon as any read fails.
pub async fn collect_window<M: BatteryMonitor, D: DelayNs>(
    monitor: &mut M,
    delay: &mut D,
    config: &GaugeConfig,
) -> Result<SampleWindow, GaugeError> {
    let mut window = SampleWindow::new();
    let count = config.sample_group_size.min(MAX_SAMPLE_GROUP);
    for n in 0..count {
        if n > 0 {
            delay.delay_ms(INTER_SAMPLE_DELAY_MS).await;
        }
        let voltage_mv = monitor
            .read_voltage_mv()
            .await
            .map_err(|_| GaugeError::SampleUnavailable)?;
        let current_ma = probe_current(monitor, config).await?;
        window
            .push(Sample {
                voltage_mv,
                current_ma,
            })
            .map_err(|_| GaugeError::SampleUnavailable)?;
    }
    Ok(window)
}

/// Mean-with-rejection over one window.
///
/// # Errors
///
/// [`GaugeError::NoStableSample`] when the window is empty or either
/// channel keeps two thirds or fewer of its samples.
#[allow(
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
pub fn filter_window(samples: &[Sample]) -> Result<FilteredWindow, GaugeError> {
    let n = samples.len() as i64;
    if n == 0 {
        return Err(GaugeError::NoStableSample);
    }
    let v_mean = samples.iter().map(|s| i64::from(s.voltage_mv)).sum::<i64>() / n;
    let i_mean = samples.iter().map(|s| i64::from(s.current_ma)).sum::<i64>() / n;

    let v_ok = |s: &Sample| (i64::from(s.voltage_mv) - v_mean).abs() <= VOLTAGE_REJECT_MV;
    let i_ok = |s: &Sample| (i64::from(s.current_ma) - i_mean).abs() <= CURRENT_REJECT_MA;

    let (mut v_sum, mut v_count) = (0i64, 0i64);
    let (mut i_sum, mut i_count) = (0i64, 0i64);
    let mut retained = SampleWindow::new();
    for s in samples {
        let keep_v = v_ok(s);
        let keep_i = i_ok(s);
        if keep_v {
            v_sum += i64::from(s.voltage_mv);
            v_count += 1;
        }
        if keep_i {
            i_sum += i64::from(s.current_ma);
            i_count += 1;
        }
        if keep_v && keep_i {
            // Capacity matches the largest window, so this cannot overflow.
            let _ = retained.push(*s);
        }
    }

    if v_count * 3 <= n * 2 || i_count * 3 <= n * 2 {
        return Err(GaugeError::NoStableSample);
    }
    Ok(FilteredWindow {
        voltage_mv: (v_sum / v_count) as u32,
        current_ma: (i_sum / i_count) as i32,
        retained,
    })
}
