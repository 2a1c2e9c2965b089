//! Software state-of-charge estimation for PMU-measured Li-ion cells.
//!
//! Turns noisy periodic voltage/current samples into a stable battery
//! percentage without a dedicated fuel-gauge chip. Internal resistance is
//! calibrated online to recover open-circuit voltage under load, the OCV is
//! mapped through a lookup table, and the displayed value is rate-limited so
//! it never jumps.
//!
//! # Pipeline
//!
//! ```text
//! status probe ─▶ sample window ─▶ filter ─▶ OCV / SOC ─▶ state policy
//!                                                │            │
//!                                      resistance estimator   ▼
//!                                                         smoother
//!                                                             │
//!                                    observer ◀─ post-process ┘──▶ persistence
//! ```
//!
//! # Units
//!
//! SOC is kept in thousandths of a percent: `100_000` is 100.000 %. The
//! displayed percentage is `soc_now / 1000`.
//!
//! # Features
//!
//! - `std` (default): host builds
//! - `defmt`: `defmt::Format` derives and logging through `defmt`
//! - `tracing`: logging through `tracing` (desktop tooling)
//! - `serde`: (de)serializable configuration and reports
//!
//! # Example
//!
//! ```no_run
//! use fuel_gauge::{Gauge, GaugeConfig, NullObserver};
//! use platform::mocks::{InstantDelay, MemoryStore, SimBattery, SimState};
//!
//! # async fn example() -> Result<(), fuel_gauge::GaugeError> {
//! let cell = SimBattery::new(SimState::default());
//! let mut gauge = Gauge::attach(
//!     GaugeConfig::default(),
//!     cell.monitor(),
//!     cell.charger(),
//!     MemoryStore::new(),
//!     InstantDelay::new(),
//!     NullObserver,
//!     0,
//! )
//! .await?;
//! let next_tick_s = gauge.tick().await;
//! # let _ = next_tick_s;
//! # Ok(())
//! # }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(async_fn_in_trait)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Must come first: the logging macros are textually scoped.
mod fmt;

pub mod config;
pub mod error;
pub mod filter;
pub mod gauge;
pub mod ocv;
pub mod persist;
pub mod report;
pub mod resistance;
pub mod service;
pub mod smooth;
pub mod state;
pub mod table;

pub use config::GaugeConfig;
pub use error::{ConfigField, GaugeError};
pub use gauge::Gauge;
pub use report::{BatteryReport, GaugeSnapshot, NullObserver, SocObserver};
pub use service::{Command, GaugeService};
pub use state::{BatteryHealth, ChargeStatus, GaugeState};
pub use table::OcvSocTable;

/// 100.000 %
pub const SOC_FULL: u32 = 100_000;
