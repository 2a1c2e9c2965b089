//! Gauge error taxonomy.
//!
//! Only [`GaugeError::ConfigInvalid`] is fatal (it is returned from
//! [`Gauge::attach`](crate::Gauge::attach)). Everything else is a per-tick
//! condition: the tick that hit it is skipped and the previous estimate is
//! kept.

use thiserror_no_std::Error;

/// Configuration field rejected by [`GaugeConfig::validate`](crate::GaugeConfig::validate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConfigField {
    /// Nominal capacity missing or zero
    Capacity,
    /// Taper voltage not above the terminal voltage
    TaperVoltage,
    /// Taper current missing or zero
    TaperCurrent,
    /// Terminal voltage missing, or secondary terminal voltage above it
    TerminalVoltage,
    /// Sample group outside the supported window size
    SampleGroupSize,
    /// OCV override incomplete or not strictly increasing
    OcvTable,
}

impl ConfigField {
    /// Field name as it appears in board configuration
    pub const fn name(self) -> &'static str {
        match self {
            Self::Capacity => "capacity_mah",
            Self::TaperVoltage => "taper_voltage_mv",
            Self::TaperCurrent => "taper_current_ma",
            Self::TerminalVoltage => "terminal_voltage_mv",
            Self::SampleGroupSize => "sample_group_size",
            Self::OcvTable => "ocv_table",
        }
    }
}

impl core::fmt::Display for ConfigField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Gauge errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GaugeError {
    /// ADC read failed; retry on the next tick
    #[error("battery sample unavailable")]
    SampleUnavailable,
    /// Too many samples of the window were rejected as outliers
    #[error("no stable sample in window")]
    NoStableSample,
    /// Charge-path step test produced a non-monotone V/I pair
    #[error("resistance calibration inconclusive")]
    ResistanceCalibrationInconclusive,
    /// Calibration was interrupted by a suspend request
    #[error("resistance calibration aborted")]
    CalibrationAborted,
    /// Charger IC did not accept a command
    #[error("charger unavailable")]
    ChargerUnavailable,
    /// Persistent store read or write failed
    #[error("persistence store unavailable")]
    PersistenceUnavailable,
    /// Board configuration rejected at attach time
    #[error("invalid gauge configuration: {0}")]
    ConfigInvalid(ConfigField),
}
