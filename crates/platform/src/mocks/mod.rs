//! Mock implementations for testing
//!
//! This module provides simulated implementations of all platform traits
//! for use in unit tests, integration tests and the `xtask simulate` tool.
//!
//! [`SimBattery`] is a tiny physical model rather than a scripted replay:
//! terminal voltage follows `V = OCV + I·R`, the charger limits current in
//! its constant-voltage phase, and the charger handle and ADC handle share
//! one state so that commanding a charge current changes what the ADC
//! reports. That is what the charge-path resistance step test needs.

#![cfg(any(test, feature = "std"))]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::{BatteryMonitor, ChargerControl, PersistKey, PersistenceStore, WallClock};

/// Error reported by the simulated ADC and charger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// Injected read failure (models an I2C NAK / ADC timeout)
    ReadFailed,
}

/// Charger commands observed by [`SimCharger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerEvent {
    /// `set_enabled(bool)` was called
    Enabled(bool),
    /// `set_charge_current_ma(u32)` was called
    Current(u32),
}

/// Mutable state of the simulated cell
#[derive(Debug, Clone)]
pub struct SimState {
    /// Open-circuit voltage (mV)
    pub ocv_mv: u32,
    /// Internal resistance (mΩ)
    pub resistance_mohm: u32,
    /// System draw from the battery while no adapter is present (mA)
    pub load_ma: u32,
    /// External adapter plugged in
    pub adapter_present: bool,
    /// Charger enable bit
    pub charger_enabled: bool,
    /// Programmed charge current (mA)
    pub charge_current_ma: u32,
    /// Constant-voltage regulation target of the charger (mV)
    pub cv_limit_mv: u32,
    /// Forces the battery current regardless of the model
    pub current_override_ma: Option<i32>,
    /// Battery temperature (0.1 °C), `None` when no thermistor is fitted
    pub temperature_dc: Option<i16>,
    /// Number of upcoming ADC reads that fail
    pub failing_reads: u32,
    /// One failure after this many further successful reads
    pub fail_read_after: Option<u32>,
    /// One-shot offsets applied to successive voltage reads
    pub voltage_offsets: VecDeque<i32>,
    /// One-shot offsets applied to successive current reads
    pub current_offsets: VecDeque<i32>,
    /// Every charger command, in order
    pub charger_log: Vec<ChargerEvent>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            ocv_mv: 3800,
            resistance_mohm: 200,
            load_ma: 0,
            adapter_present: false,
            charger_enabled: false,
            charge_current_ma: 1500,
            cv_limit_mv: 4200,
            current_override_ma: None,
            temperature_dc: None,
            failing_reads: 0,
            fail_read_after: None,
            voltage_offsets: VecDeque::new(),
            current_offsets: VecDeque::new(),
            charger_log: Vec::new(),
        }
    }
}

impl SimState {
    /// Battery current implied by the model (positive = charging)
    #[allow(clippy::arithmetic_side_effects, clippy::cast_possible_wrap)]
    pub fn battery_current_ma(&self) -> i32 {
        if let Some(current) = self.current_override_ma {
            return current;
        }
        if self.adapter_present && self.charger_enabled {
            let headroom = self.cv_limit_mv.saturating_sub(self.ocv_mv);
            let cv_current = headroom * 1000 / self.resistance_mohm.max(1);
            return self.charge_current_ma.min(cv_current) as i32;
        }
        if self.adapter_present {
            return 0;
        }
        -(self.load_ma as i32)
    }

    /// Terminal voltage implied by the model (mV)
    #[allow(clippy::arithmetic_side_effects, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn terminal_voltage_mv(&self) -> u32 {
        let drop = i64::from(self.battery_current_ma()) * i64::from(self.resistance_mohm) / 1000;
        (i64::from(self.ocv_mv) + drop).max(0) as u32
    }
}

/// Shared handle to a simulated cell
#[derive(Debug, Clone, Default)]
pub struct SimBattery {
    state: Rc<RefCell<SimState>>,
}

impl SimBattery {
    /// Create a simulated cell from an initial state
    pub fn new(state: SimState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// ADC handle
    pub fn monitor(&self) -> SimMonitor {
        SimMonitor {
            state: Rc::clone(&self.state),
        }
    }

    /// Charger handle
    pub fn charger(&self) -> SimCharger {
        SimCharger {
            state: Rc::clone(&self.state),
        }
    }

    /// Mutate the model
    pub fn update(&self, f: impl FnOnce(&mut SimState)) {
        f(&mut self.state.borrow_mut());
    }

    /// Copy of the current model state
    pub fn snapshot(&self) -> SimState {
        self.state.borrow().clone()
    }

    /// Number of `set_enabled(true)` commands observed so far
    pub fn enable_count(&self) -> usize {
        self.state
            .borrow()
            .charger_log
            .iter()
            .filter(|e| **e == ChargerEvent::Enabled(true))
            .count()
    }
}

/// Simulated ADC, see [`SimBattery::monitor`]
#[derive(Debug)]
pub struct SimMonitor {
    state: Rc<RefCell<SimState>>,
}

impl SimMonitor {
    fn take_failure(state: &mut SimState) -> Result<(), SimError> {
        if state.failing_reads > 0 {
            state.failing_reads = state.failing_reads.saturating_sub(1);
            return Err(SimError::ReadFailed);
        }
        match state.fail_read_after {
            Some(0) => {
                state.fail_read_after = None;
                Err(SimError::ReadFailed)
            }
            Some(n) => {
                state.fail_read_after = Some(n.saturating_sub(1));
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl BatteryMonitor for SimMonitor {
    type Error = SimError;

    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    async fn read_voltage_mv(&mut self) -> Result<u32, Self::Error> {
        let mut state = self.state.borrow_mut();
        Self::take_failure(&mut state)?;
        let offset = state.voltage_offsets.pop_front().unwrap_or(0);
        let voltage = i64::from(state.terminal_voltage_mv()) + i64::from(offset);
        Ok(voltage.max(0) as u32)
    }

    async fn read_current_ma(&mut self) -> Result<i32, Self::Error> {
        let mut state = self.state.borrow_mut();
        Self::take_failure(&mut state)?;
        let offset = state.current_offsets.pop_front().unwrap_or(0);
        Ok(state.battery_current_ma().saturating_add(offset))
    }

    async fn read_temperature_decicelsius(&mut self) -> Option<i16> {
        self.state.borrow().temperature_dc
    }
}

/// Simulated charger IC, see [`SimBattery::charger`]
#[derive(Debug)]
pub struct SimCharger {
    state: Rc<RefCell<SimState>>,
}

impl ChargerControl for SimCharger {
    type Error = SimError;

    async fn set_enabled(&mut self, enabled: bool) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.charger_enabled = enabled;
        state.charger_log.push(ChargerEvent::Enabled(enabled));
        Ok(())
    }

    async fn set_charge_current_ma(&mut self, current_ma: u32) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.charge_current_ma = current_ma;
        state.charger_log.push(ChargerEvent::Current(current_ma));
        Ok(())
    }

    async fn is_enabled(&mut self) -> Result<bool, Self::Error> {
        Ok(self.state.borrow().charger_enabled)
    }
}

/// Error reported by [`MemoryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStoreError {
    /// Injected write failure
    WriteFailed,
}

#[derive(Debug, Default)]
struct StoreInner {
    slots: [Option<u32>; 3],
    writes: Vec<(PersistKey, u32)>,
    fail_writes: bool,
}

/// RAM-backed persistence store with a write log.
///
/// Clones share the same slots, so a test can keep a handle after moving
/// the store into the gauge.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<StoreInner>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with values
    pub fn with(values: &[(PersistKey, u32)]) -> Self {
        let store = Self::new();
        for (key, value) in values {
            store.preset(*key, *value);
        }
        store
    }

    /// Write a slot without recording it in the write log
    pub fn preset(&self, key: PersistKey, value: u32) {
        if let Some(slot) = self.inner.borrow_mut().slots.get_mut(key.slot()) {
            *slot = Some(value);
        }
    }

    /// Current slot contents
    pub fn value(&self, key: PersistKey) -> Option<u32> {
        self.inner.borrow().slots.get(key.slot()).copied().flatten()
    }

    /// Every successful `set`, in order
    pub fn writes(&self) -> Vec<(PersistKey, u32)> {
        self.inner.borrow().writes.clone()
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }
}

impl PersistenceStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn get(&mut self, key: PersistKey) -> Result<Option<u32>, Self::Error> {
        Ok(self.value(key))
    }

    async fn set(&mut self, key: PersistKey, value: u32) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(MemoryStoreError::WriteFailed);
        }
        if let Some(slot) = inner.slots.get_mut(key.slot()) {
            *slot = Some(value);
        }
        inner.writes.push((key, value));
        Ok(())
    }

    async fn clear(&mut self, key: PersistKey) -> Result<(), Self::Error> {
        if let Some(slot) = self.inner.borrow_mut().slots.get_mut(key.slot()) {
            *slot = None;
        }
        Ok(())
    }
}

/// Delay that returns immediately and records what was requested
#[derive(Debug, Clone, Default)]
pub struct InstantDelay {
    total_ns: Rc<Cell<u64>>,
}

impl InstantDelay {
    /// Create a new delay
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all requested delays, in milliseconds
    pub fn total_ms(&self) -> u64 {
        self.total_ns.get() / 1_000_000
    }
}

impl embedded_hal_async::delay::DelayNs for InstantDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ns
            .set(self.total_ns.get().saturating_add(u64::from(ns)));
    }
}

/// Wall clock advanced by hand
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    /// Create a clock reading `start` seconds
    pub fn new(start: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, secs: u64) {
        self.now.set(self.now.get().saturating_add(secs));
    }
}

impl WallClock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.get()
    }
}
