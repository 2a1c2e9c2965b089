//! Battery measurement and charger control abstractions
//!
//! Sign convention for current: positive = charging, negative = discharging.

/// Battery ADC interface (PMU voltage/current/temperature channels)
pub trait BatteryMonitor {
    /// Error type
    type Error: core::fmt::Debug;

    /// Read battery terminal voltage (mV)
    fn read_voltage_mv(&mut self) -> impl core::future::Future<Output = Result<u32, Self::Error>>;

    /// Read battery current (mA, signed)
    fn read_current_ma(&mut self) -> impl core::future::Future<Output = Result<i32, Self::Error>>;

    /// Read battery temperature in tenths of a degree Celsius (if a
    /// thermistor is fitted)
    fn read_temperature_decicelsius(
        &mut self,
    ) -> impl core::future::Future<Output = Option<i16>> {
        async { None }
    }
}

/// Charger IC control interface
pub trait ChargerControl {
    /// Error type
    type Error: core::fmt::Debug;

    /// Enable or disable charging
    fn set_enabled(
        &mut self,
        enabled: bool,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Program the constant-current phase charge current (mA)
    fn set_charge_current_ma(
        &mut self,
        current_ma: u32,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Check whether the charger is currently enabled
    fn is_enabled(&mut self) -> impl core::future::Future<Output = Result<bool, Self::Error>>;
}
