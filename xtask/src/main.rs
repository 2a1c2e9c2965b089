// Desktop/tooling crate: unwrap/expect/panic acceptable in non-embedded code.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod simulate;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Fuel gauge development tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests (unit, integration and doc)
    Test {
        /// Run only unit tests
        #[arg(long)]
        unit: bool,
        /// Run only integration tests
        #[arg(long)]
        integration: bool,
    },
    /// Replay a simulated charge or discharge through the gauge
    Simulate {
        /// Charge (adapter plugged in) or discharge (load on battery)
        #[arg(value_enum, default_value_t = simulate::Mode::Discharge)]
        mode: simulate::Mode,
        /// Starting state of charge of the simulated cell (%)
        #[arg(long, default_value_t = 50)]
        start: u8,
        /// Discharge load (mA)
        #[arg(long, default_value_t = 800)]
        load: u32,
        /// Number of ticks to run
        #[arg(long, default_value_t = 200)]
        ticks: u32,
        /// Print every tick instead of only percentage changes
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test { unit, integration } => test::run(unit, integration),
        Commands::Simulate {
            mode,
            start,
            load,
            ticks,
            verbose,
        } => simulate::run(&simulate::Options {
            mode,
            start_percent: start,
            load_ma: load,
            ticks,
            verbose,
        }),
    }
}
