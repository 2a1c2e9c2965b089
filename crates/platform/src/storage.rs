//! Non-volatile key/value storage abstraction

/// Keys the gauge persists across reboot and sleep.
///
/// The set is fixed and small, so no schema versioning is carried; a store
/// that does not recognise a key simply reports it as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersistKey {
    /// Last committed state of charge (0..=100000, thousandths of a percent)
    Soc,
    /// Learned effective capacity (mAh), 0 when never learned
    RealCapacity,
    /// Wall-clock hour (RTC seconds / 3600) of the last orderly shutdown
    ShutdownHour,
}

impl PersistKey {
    /// All keys, in storage-slot order
    pub const ALL: [PersistKey; 3] = [Self::Soc, Self::RealCapacity, Self::ShutdownHour];

    /// Stable slot index for stores backed by a fixed register bank
    pub const fn slot(self) -> usize {
        match self {
            Self::Soc => 0,
            Self::RealCapacity => 1,
            Self::ShutdownHour => 2,
        }
    }
}

/// Persistent key/value store
pub trait PersistenceStore {
    /// Error type
    type Error: core::fmt::Debug;

    /// Read a value; `Ok(None)` when the key was never written or was cleared
    fn get(
        &mut self,
        key: PersistKey,
    ) -> impl core::future::Future<Output = Result<Option<u32>, Self::Error>>;

    /// Write a value
    fn set(
        &mut self,
        key: PersistKey,
        value: u32,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Remove a value so that subsequent reads return `None`
    fn clear(&mut self, key: PersistKey)
        -> impl core::future::Future<Output = Result<(), Self::Error>>;
}
