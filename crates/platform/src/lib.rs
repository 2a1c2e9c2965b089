//! Collaborator abstractions for the battery fuel gauge.
//!
//! The estimation engine never touches hardware or non-volatile memory
//! directly. Everything it consumes from the board is expressed here as a
//! trait, so the same engine runs against the PMU on target and against the
//! simulation mocks on the host.
//!
//! # Architecture Layers
//!
//! ```text
//! Polling service (fuel-gauge::service)
//!         ↓
//! Estimation engine (fuel-gauge)
//!         ↓
//! Collaborator traits (this crate)
//!         ↓
//! PMU ADC / charger IC / NVRAM / RTC drivers (board support)
//! ```
//!
//! # Collaborators
//!
//! - [`BatteryMonitor`] - battery voltage, current and temperature ADC
//! - [`ChargerControl`] - charger enable and programmed charge current
//! - [`PersistenceStore`] - key/value storage surviving power loss
//! - [`WallClock`] - RTC seconds, used across suspend and power-off
//!
//! # Features
//!
//! - `std`: Enable the simulation mocks in [`mocks`]
//! - `defmt`: Enable defmt logging derives

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
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(async_fn_in_trait)] // single-threaded executor, Send bounds not needed

pub mod clock;
pub mod power;
pub mod storage;

#[cfg(any(test, feature = "std"))]
pub mod mocks;

pub use clock::WallClock;
pub use power::{BatteryMonitor, ChargerControl};
pub use storage::{PersistKey, PersistenceStore};
