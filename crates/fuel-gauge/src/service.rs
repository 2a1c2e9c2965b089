//! Async polling service.
//!
//! Wraps a [`Gauge`] in an embassy mutex so that a status query from another
//! task never sees a half-finished tick. The lock is held for a whole tick,
//! or a whole suspend/resume compensation, and for nothing else.
//!
//! ```text
//!   run() ──▶ select(Timer::after(interval), commands.wait())
//!               │ timeout                 │ Suspend
//!               ▼                         ▼
//!             tick (lock held)          park until Resume ──▶ tick now
//! ```
//!
//! Suspend raises the `suspended` flag before it queues on the lock. A tick
//! already running finishes, but its charge step test sees the flag at the
//! next checkpoint, restores the charger and keeps the previous resistance.
//! A tick that was waiting for the lock sees the flag once it gets the lock
//! and does nothing. The flag drops only when [`GaugeService::resume`] has
//! applied the sleep compensation.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use embedded_hal_async::delay::DelayNs;
use platform::{BatteryMonitor, ChargerControl, PersistenceStore, WallClock};

use crate::gauge::Gauge;
use crate::report::{GaugeSnapshot, SocObserver};

/// Commands delivered to the polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Stop scheduling ticks
    Suspend,
    /// Compensation done, tick immediately
    Resume,
}

/// Periodic driver around a [`Gauge`]
pub struct GaugeService<R: RawMutex, M, C, S, D, N, K> {
    gauge: Mutex<R, Gauge<M, C, S, D, N>>,
    commands: Signal<R, Command>,
    suspended: AtomicBool,
    clock: K,
}

impl<R, M, C, S, D, N, K> GaugeService<R, M, C, S, D, N, K>
where
    R: RawMutex,
    M: BatteryMonitor,
    C: ChargerControl,
    S: PersistenceStore,
    D: DelayNs,
    N: SocObserver,
    K: WallClock,
{
    /// Wrap an attached gauge
    pub fn new(gauge: Gauge<M, C, S, D, N>, clock: K) -> Self {
        Self {
            gauge: Mutex::new(gauge),
            commands: Signal::new(),
            suspended: AtomicBool::new(false),
            clock,
        }
    }

    /// Polling loop. Never returns.
    pub async fn run(&self) -> ! {
        let mut next = Duration::from_secs(u64::from(self.gauge.lock().await.state().interval_s));
        loop {
            match select(Timer::after(next), self.commands.wait()).await {
                Either::First(()) => {
                    next = Duration::from_secs(u64::from(self.tick().await));
                }
                Either::Second(Command::Suspend) => {
                    debug!("service parked");
                    while self.commands.wait().await != Command::Resume {}
                    next = Duration::from_ticks(0);
                }
                Either::Second(Command::Resume) => {
                    next = Duration::from_ticks(0);
                }
            }
        }
    }

    /// Run one tick under the lock and return the next interval (s).
    ///
    /// While suspended nothing runs and the current interval is returned.
    pub async fn tick(&self) -> u32 {
        let mut gauge = self.gauge.lock().await;
        if self.is_suspended() {
            trace!("tick dropped, suspended");
            return gauge.state().interval_s;
        }
        gauge.tick_with_abort(&self.suspended).await
    }

    /// Stop ticking and record the suspend point.
    ///
    /// Waits for an in-flight tick, which is asked to abort its calibration.
    /// No tick runs after this returns until [`resume`](Self::resume).
    pub async fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
        self.commands.signal(Command::Suspend);
        let mut gauge = self.gauge.lock().await;
        gauge.suspend(self.clock.now_secs()).await;
    }

    /// Apply the sleep compensation and restart ticking at once.
    pub async fn resume(&self) {
        {
            let mut gauge = self.gauge.lock().await;
            gauge.resume(self.clock.now_secs()).await;
            self.suspended.store(false, Ordering::Release);
        }
        self.commands.signal(Command::Resume);
    }

    /// Between [`suspend`](Self::suspend) and [`resume`](Self::resume)
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Displayed percentage
    pub async fn soc_percent(&self) -> u8 {
        self.gauge.lock().await.soc_percent()
    }

    /// Debug dump
    pub async fn snapshot(&self) -> GaugeSnapshot {
        self.gauge.lock().await.snapshot()
    }

    /// Flush state before power-off.
    ///
    /// # Errors
    ///
    /// [`GaugeError::PersistenceUnavailable`](crate::GaugeError::PersistenceUnavailable)
    pub async fn shutdown(&self) -> Result<(), crate::GaugeError> {
        let mut gauge = self.gauge.lock().await;
        gauge.shutdown(self.clock.now_secs()).await
    }
}
