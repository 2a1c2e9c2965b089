//! `cargo xtask simulate`: run the gauge against a simulated cell.
//!
//! The cell keeps its own coulomb count and derives its OCV from the same
//! table the gauge uses, so the printed "true" SOC is what a perfect gauge
//! would show.

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use colored::Colorize;
use embassy_futures::block_on;
use fuel_gauge::{BatteryReport, Gauge, GaugeConfig, OcvSocTable, SOC_FULL};
use platform::mocks::{InstantDelay, MemoryStore, SimBattery, SimState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Charge,
    Discharge,
}

pub struct Options {
    pub mode: Mode,
    pub start_percent: u8,
    pub load_ma: u32,
    pub ticks: u32,
    pub verbose: bool,
}

/// Coulomb-counted cell behind the [`SimBattery`] handle
struct Cell {
    sim: SimBattery,
    table: OcvSocTable,
    capacity_mah: u32,
    /// Remaining charge (µAh)
    charge_uah: i64,
}

#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
impl Cell {
    fn new(sim: SimBattery, table: OcvSocTable, capacity_mah: u32, start_percent: u8) -> Self {
        let charge_uah = i64::from(capacity_mah) * 10 * i64::from(start_percent.min(100));
        let mut cell = Self {
            sim,
            table,
            capacity_mah,
            charge_uah,
        };
        cell.sync_ocv();
        cell
    }

    fn true_soc(&self) -> u32 {
        let full = i64::from(self.capacity_mah) * 1000;
        (self.charge_uah.clamp(0, full) * i64::from(SOC_FULL) / full.max(1)) as u32
    }

    /// Integrate the model current over `secs` and move the OCV with it.
    fn advance(&mut self, secs: u32) {
        let current = i64::from(self.sim.snapshot().battery_current_ma());
        self.charge_uah += current * i64::from(secs) * 1000 / 3600;
        self.sync_ocv();
    }

    fn sync_ocv(&mut self) {
        let ocv = self.table.ocv_for(self.true_soc());
        self.sim.update(|s| s.ocv_mv = ocv);
    }
}

pub fn run(opts: &Options) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let config = GaugeConfig::default();
    let table = config
        .build_table()
        .map_err(|e| anyhow!("default configuration rejected: {}", e))?;

    let sim = SimBattery::new(SimState {
        adapter_present: opts.mode == Mode::Charge,
        charger_enabled: opts.mode == Mode::Charge,
        load_ma: opts.load_ma,
        temperature_dc: Some(250),
        ..SimState::default()
    });
    let mut cell = Cell::new(sim.clone(), table, config.capacity_mah, opts.start_percent);

    println!();
    println!(
        "{}",
        format!(
            "🔋 Simulating {} from {}% ({} ticks)",
            match opts.mode {
                Mode::Charge => "charge",
                Mode::Discharge => "discharge",
            },
            opts.start_percent,
            opts.ticks
        )
        .cyan()
        .bold()
    );
    println!();

    let observer = |report: &BatteryReport| {
        println!(
            "{}",
            format!(
                "  ▸ report: {}% {} {} mV {} mA",
                report.percent, report.status, report.voltage_mv, report.current_ma
            )
            .green()
        );
    };

    block_on(async {
        let mut gauge = Gauge::attach(
            config,
            sim.monitor(),
            sim.charger(),
            MemoryStore::new(),
            InstantDelay::new(),
            observer,
            0,
        )
        .await
        .map_err(|e| anyhow!("attach failed: {}", e))?;

        let mut elapsed_s: u64 = 0;
        let mut last_percent = gauge.soc_percent();
        for tick in 0..opts.ticks {
            let interval = gauge.tick().await;
            cell.advance(interval);
            elapsed_s = elapsed_s.saturating_add(u64::from(interval));

            let state = gauge.state();
            let percent = gauge.soc_percent();
            if opts.verbose || percent != last_percent {
                println!(
                    "  {:>5} {:>7}s  {:<13} now {:>6}  real {:>6}  true {:>6}  next {}s",
                    tick,
                    elapsed_s,
                    state.status.as_str(),
                    state.soc_now,
                    state.soc_real,
                    cell.true_soc(),
                    interval
                );
            }
            last_percent = percent;
        }

        println!();
        println!("{}", gauge.snapshot());
        anyhow::Ok(())
    })
}
