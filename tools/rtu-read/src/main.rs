//! rtu-read - poll holding registers from a Modbus RTU slave
//!
//! ```text
//! rtu-read --device /dev/ttyUSB0 --unit 1
//! rtu-read --config rtu.yaml --unit 1 --unit 2 --interval-ms 1000
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use rtu_master::logging::hex_dump;
use rtu_master::{connect, load_config, ReadResponse, RtuClient, RtuConfig, RtuError};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rtu-read")]
#[command(about = "Read holding registers from Modbus RTU slaves")]
struct Cli {
    /// Config file (.toml, .yaml, .json); RTU_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device, overrides the config file
    #[arg(short, long)]
    device: Option<String>,

    #[arg(short, long)]
    baud_rate: Option<u32>,

    /// Slave unit address, may be repeated
    #[arg(short, long = "unit", required = true)]
    units: Vec<u8>,

    /// First register of the window
    #[arg(short, long)]
    start: Option<u16>,

    /// Number of registers
    #[arg(short = 'n', long)]
    count: Option<u16>,

    /// Per-request timeout in milliseconds (0 waits forever)
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Poll repeatedly at this interval instead of reading once
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Print raw frames
    #[arg(long)]
    raw: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    no_color: bool,
}

impl Cli {
    fn build_config(&self) -> Result<RtuConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RtuConfig::default(),
        };

        if let Some(device) = &self.device {
            config.device.clone_from(device);
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(start) = self.start {
            config.start_register = start;
        }
        if let Some(count) = self.count {
            config.register_count = count;
        }
        if self.timeout_ms.is_some() {
            config.timeout_ms = self.timeout_ms;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    rtu_master::logging::init(if cli.verbose { "debug" } else { "warn" });

    let config = cli.build_config()?;
    let client = connect(&config).await?;
    info!(
        "Polling {} unit(s) on {}",
        cli.units.len(),
        config.device
    );

    let outcome = match cli.interval_ms {
        Some(ms) => poll(&client, &cli, Duration::from_millis(ms.max(1))).await,
        None => read_all(&client, &cli).await,
    };

    client.close().await;
    outcome
}

async fn poll(client: &RtuClient, cli: &Cli, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = read_all(client, cli).await {
                    if !client.is_open() {
                        return Err(e);
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            },
        }
    }
}

async fn read_all(client: &RtuClient, cli: &Cli) -> Result<()> {
    let mut failed = 0;
    for &unit in &cli.units {
        match client.read(unit).await {
            Ok(reading) => print_reading(unit, &reading, cli.raw),
            Err(e) => {
                failed += 1;
                print_error(unit, &e);
                if e.needs_reconnect() {
                    bail!("session lost: {e}");
                }
            },
        }
    }
    if failed == cli.units.len() {
        bail!("no unit answered");
    }
    Ok(())
}

fn print_reading(unit: u8, reading: &ReadResponse, raw: bool) {
    let values = reading
        .registers()
        .iter()
        .map(|v| format!("{v:5}"))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{} {}", format!("[{unit:>3}]").bright_cyan(), values);
    if raw {
        println!("      {}", hex_dump(&reading.buffer).dimmed());
    }
}

fn print_error(unit: u8, err: &RtuError) {
    if err.is_retryable() {
        warn!("unit {}: {}", unit, err);
    }
    println!("{} {}", format!("[{unit:>3}]").bright_cyan(), err.to_string().red());
}
