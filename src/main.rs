//! CLI entry point for keithley_logger
//!
//! Run the logger against the configured serial port:
//! ```bash
//! keithley_logger run --config config/default.toml
//! ```
//!
//! Run without hardware:
//! ```bash
//! keithley_logger run --simulate
//! ```
//!
//! Dump a group's history as CSV:
//! ```bash
//! keithley_logger grab --group MagField --start 2024-01-14 --stop 2024-01-15
//! ```

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use keithley_logger::adapters::{SerialTransport, SimulatedTransport, Transport};
use keithley_logger::config::{Settings, DEFAULT_CONFIG_PATH};
use keithley_logger::data::Loader;
use keithley_logger::instrument::Keithley2700;
use keithley_logger::AcquisitionController;
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keithley_logger")]
#[command(about = "Keithley 2700 multimeter logger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire and log until interrupted
    Run {
        /// Configuration file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Use a simulated multimeter instead of the serial port
        #[arg(long)]
        simulate: bool,
    },

    /// Print a save group's logged rows as CSV
    Grab {
        /// Configuration file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Save group name
        #[arg(long)]
        group: String,

        /// First date (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        stop: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, simulate } => {
            let settings = load_settings(&config)?;
            init_tracing(&settings);
            run(settings, simulate).await
        }
        Commands::Grab {
            config,
            group,
            start,
            stop,
        } => {
            let settings = load_settings(&config)?;
            init_tracing(&settings);
            grab(&settings, &group, start, stop.unwrap_or_else(|| Local::now().date_naive()))
        }
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr so `grab`
/// output stays clean.
fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(settings: Settings, simulate: bool) -> Result<()> {
    let groups = settings
        .build_save_groups()
        .context("Failed to build save groups")?;

    let transport: Box<dyn Transport> = if simulate {
        warn!("Using simulated multimeter; no hardware will be contacted");
        Box::new(SimulatedTransport::new())
    } else {
        Box::new(SerialTransport::from_settings(&settings.instrument))
    };
    let driver = Keithley2700::new(transport)
        .with_inter_command_delay(settings.instrument.inter_command_delay());

    let mut controller = AcquisitionController::new(driver, groups);
    controller
        .initialize()
        .await
        .context("Failed to initialize the multimeter")?;

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    controller
        .run(settings.acquisition.interval(), shutdown)
        .await
        .context("Acquisition stopped with an error")?;

    info!("Logger stopped");
    Ok(())
}

fn grab(settings: &Settings, group: &str, start: NaiveDate, stop: NaiveDate) -> Result<()> {
    let groups = settings
        .build_save_groups()
        .context("Failed to build save groups")?;
    let group = groups
        .iter()
        .find(|g| g.name() == group)
        .with_context(|| format!("No save group named '{}' in configuration", group))?;

    let loader = Loader::for_group(group);
    let table = loader
        .grab_dates(start, stop)
        .with_context(|| format!("Failed to read history for '{}'", group.name()))?;
    info!("Read {} rows for '{}'", table.len(), group.name());

    table
        .write_csv(std::io::stdout().lock(), group.date_format(), group.time_format())
        .context("Failed to write CSV to stdout")?;
    Ok(())
}
