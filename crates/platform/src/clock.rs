//! Wall-clock time source

/// Real-time clock that keeps counting while the SoC is suspended or off.
///
/// The monotonic executor clock stops in deep sleep on most PMUs, so elapsed
/// sleep and power-off time must come from the RTC.
pub trait WallClock {
    /// Seconds since an arbitrary but fixed epoch
    fn now_secs(&self) -> u64;
}
