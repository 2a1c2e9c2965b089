//! Persistence adapter.
//!
//! Thin wrappers over [`PersistenceStore`] that map store errors onto
//! [`GaugeError::PersistenceUnavailable`] and log them, plus the arithmetic
//! for time spent asleep or powered off.

use platform::{PersistKey, PersistenceStore};

use crate::GaugeError;

/// Persist `soc_now` once it has fallen this far below the stored value
pub const PERSIST_THRESHOLD: u32 = 1_000;

/// A restored SOC this far from a fresh OCV estimate is discarded
pub const RESTORE_SANITY_WINDOW: u32 = 30_000;

const SECS_PER_HOUR: u64 = 3600;

/// Read a key; failures and missing values both come back as `None`.
pub(crate) async fn load<S: PersistenceStore>(store: &mut S, key: PersistKey) -> Option<u32> {
    match store.get(key).await {
        Ok(value) => value,
        Err(_) => {
            warn!("persist: read of slot {} failed", key.slot());
            None
        }
    }
}

/// Write a key.
pub(crate) async fn save<S: PersistenceStore>(
    store: &mut S,
    key: PersistKey,
    value: u32,
) -> Result<(), GaugeError> {
    store.set(key, value).await.map_err(|_| {
        warn!("persist: write of slot {} failed", key.slot());
        GaugeError::PersistenceUnavailable
    })?;
    trace!("persist: slot {} = {}", key.slot(), value);
    Ok(())
}

/// Remove a key.
pub(crate) async fn clear<S: PersistenceStore>(
    store: &mut S,
    key: PersistKey,
) -> Result<(), GaugeError> {
    store
        .clear(key)
        .await
        .map_err(|_| GaugeError::PersistenceUnavailable)
}

/// SOC drained by `current_ua` over `elapsed_s` seconds.
///
/// `elapsed · µA / (mAh · 36)`, truncating.
#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]
pub fn sleep_consumption(elapsed_s: u64, current_ua: u32, capacity_mah: u32) -> u32 {
    let divisor = u64::from(capacity_mah) * 36;
    if divisor == 0 {
        return 0;
    }
    let drained = u128::from(elapsed_s) * u128::from(current_ua) / u128::from(divisor);
    drained.min(u128::from(u32::MAX)) as u32
}

/// SOC drained while powered off between `shutdown_hour` and `now_s`.
///
/// Whole hours only, matching the resolution of the stored shutdown stamp.
pub fn power_off_consumption(
    shutdown_hour: u32,
    now_s: u64,
    current_ua: u32,
    capacity_mah: u32,
) -> u32 {
    let elapsed_hours = (now_s / SECS_PER_HOUR).saturating_sub(u64::from(shutdown_hour));
    sleep_consumption(
        elapsed_hours.saturating_mul(SECS_PER_HOUR),
        current_ua,
        capacity_mah,
    )
}

/// Hour stamp written at shutdown
#[allow(clippy::cast_possible_truncation)]
pub fn hour_stamp(now_s: u64) -> u32 {
    (now_s / SECS_PER_HOUR).min(u64::from(u32::MAX)) as u32
}

/// Whether `soc_now` should be written back.
///
/// Only downward moves count; a rise is flushed by suspend or shutdown.
pub fn should_persist(persisted: Option<u32>, soc_now: u32) -> bool {
    match persisted {
        None => true,
        Some(stored) => stored.saturating_sub(soc_now) > PERSIST_THRESHOLD,
    }
}

/// Pick the starting SOC from a restored value and a fresh estimate.
pub fn reconcile_restored(restored: Option<u32>, fresh: Option<u32>) -> Option<u32> {
    match (restored, fresh) {
        (Some(r), Some(f)) if r.abs_diff(f) > RESTORE_SANITY_WINDOW => Some(f),
        (Some(r), _) => Some(r),
        (None, f) => f,
    }
}
