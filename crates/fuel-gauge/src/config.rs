//! Board configuration for the gauge.
//!
//! Read once at attach time and never mutated afterwards. Board files are
//! parsed by the integrator; with the `serde` feature enabled the struct can
//! be deserialized directly.

use crate::table::OcvSocTable;
use crate::{ConfigField, GaugeError};

/// Number of chunks in an OCV override
pub const OCV_CHUNKS: usize = 10;
/// Breakpoints per chunk
pub const OCV_CHUNK_LEN: usize = 10;

/// Chunked OCV override: chunk `k`, slot `j` is the OCV (mV) at `(10k + j + 1)` %
pub type OcvChunks = [[u32; OCV_CHUNK_LEN]; OCV_CHUNKS];

/// Supported filter window sizes
pub const SAMPLE_GROUP_RANGE: core::ops::RangeInclusive<usize> = 3..=MAX_SAMPLE_GROUP;

/// Largest filter window
pub const MAX_SAMPLE_GROUP: usize = 32;

/// Gauge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GaugeConfig {
    /// Nominal capacity (mAh)
    pub capacity_mah: u32,
    /// OCV at which the cell counts as full (mV)
    pub taper_voltage_mv: u32,
    /// Charge current below which the cell counts as full (mA)
    pub taper_current_ma: u32,
    /// Empty cutoff (mV)
    pub terminal_voltage_mv: u32,
    /// Hard cutoff (mV); below it the low-power latch fires at once
    pub secondary_terminal_voltage_mv: u32,
    /// Battery voltage floor for the full-power check (mV)
    pub min_over_charge_protect_mv: u32,
    /// Programmed charge current, restored after calibration (mA)
    pub charge_current_ma: u32,
    /// Drain while suspended (µA)
    pub suspend_current_ua: u32,
    /// Drain while powered off (µA)
    pub shutdown_current_ua: u32,
    /// Samples per filter window
    pub sample_group_size: usize,
    /// Positive readings below this are treated as zero (mA)
    pub charge_noise_floor_ma: u32,
    /// Negative readings with a magnitude below this are treated as zero (mA)
    pub discharge_noise_floor_ma: u32,
    /// Optional OCV override; the built-in curve is used when `None`
    pub ocv_table: Option<OcvChunks>,
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self {
            capacity_mah: 4000,
            taper_voltage_mv: 4180,
            taper_current_ma: 150,
            terminal_voltage_mv: 3450,
            secondary_terminal_voltage_mv: 3300,
            min_over_charge_protect_mv: 4100,
            charge_current_ma: 1500,
            suspend_current_ua: 50,
            shutdown_current_ua: 30,
            sample_group_size: 10,
            charge_noise_floor_ma: 50,
            discharge_noise_floor_ma: 30,
            ocv_table: None,
        }
    }
}

impl GaugeConfig {
    /// Load one chunk of an OCV override.
    ///
    /// Chunks may arrive in any order. Slots not yet loaded read as zero and
    /// fail [`validate`](Self::validate) until every chunk is present.
    ///
    /// # Errors
    ///
    /// [`GaugeError::ConfigInvalid`] when `index` is not a chunk index.
    pub fn with_ocv_chunk(
        mut self,
        index: usize,
        chunk: [u32; OCV_CHUNK_LEN],
    ) -> Result<Self, GaugeError> {
        let table = self.ocv_table.get_or_insert([[0; OCV_CHUNK_LEN]; OCV_CHUNKS]);
        let slot = table
            .get_mut(index)
            .ok_or(GaugeError::ConfigInvalid(ConfigField::OcvTable))?;
        *slot = chunk;
        Ok(self)
    }

    /// Check the configuration, naming the first field that is wrong.
    ///
    /// # Errors
    ///
    /// [`GaugeError::ConfigInvalid`]
    pub fn validate(&self) -> Result<(), GaugeError> {
        let fail = |field| Err(GaugeError::ConfigInvalid(field));
        if self.capacity_mah == 0 {
            return fail(ConfigField::Capacity);
        }
        if self.terminal_voltage_mv == 0
            || self.secondary_terminal_voltage_mv > self.terminal_voltage_mv
        {
            return fail(ConfigField::TerminalVoltage);
        }
        if self.taper_voltage_mv <= self.terminal_voltage_mv {
            return fail(ConfigField::TaperVoltage);
        }
        if self.taper_current_ma == 0 {
            return fail(ConfigField::TaperCurrent);
        }
        if !SAMPLE_GROUP_RANGE.contains(&self.sample_group_size) {
            return fail(ConfigField::SampleGroupSize);
        }
        if let Some(chunks) = &self.ocv_table {
            if chunks.iter().flatten().any(|mv| *mv == 0) {
                return fail(ConfigField::OcvTable);
            }
        }
        Ok(())
    }

    /// Validate and build the lookup table.
    ///
    /// # Errors
    ///
    /// [`GaugeError::ConfigInvalid`]
    pub fn build_table(&self) -> Result<OcvSocTable, GaugeError> {
        self.validate()?;
        match &self.ocv_table {
            Some(chunks) => OcvSocTable::from_chunks(chunks, self.taper_voltage_mv),
            None => Ok(OcvSocTable::builtin(self.taper_voltage_mv)),
        }
    }

    /// Capacity used for Coulomb steps: the learned value when known
    pub fn effective_capacity_mah(&self, real_capacity_mah: u32) -> u32 {
        if real_capacity_mah > 0 {
            real_capacity_mah
        } else {
            self.capacity_mah
        }
    }
}
