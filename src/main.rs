// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use dpaux_bridge::{
    Config, DetectionCache, SeqValue, Selector, SharedDriver, backends, bytes_from_sequence,
    describe_detection_error, format_bytes, vendor_hint,
};

#[macro_use]
extern crate tracing;

#[derive(Parser)]
#[command(name = "dpaux-bridge", version, about = "DPCD and I2C access through the GPU driver")]
struct Cli {
    /// Vendor key to try first (e.g. nvidia, intel)
    #[arg(long, global = true)]
    vendor: Option<String>,

    /// Adapter description used to guess the vendor
    #[arg(long, global = true)]
    adapter: Option<String>,

    /// Alternative configuration file
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Report which backend is available
    Probe,
    /// Read DPCD registers
    ReadDpcd {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(value_parser = parse_u32, default_value = "1")]
        length: u32,
    },
    /// Write DPCD registers
    WriteDpcd {
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Bytes to write, decimal or 0x-prefixed hex
        #[arg(required = true)]
        data: Vec<String>,
    },
    /// Read over I2C; the address packs the register above the 7-bit slave (0x1A50)
    ReadI2c {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(value_parser = parse_u32, default_value = "1")]
        length: u32,
    },
    /// Write over I2C
    WriteI2c {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(required = true)]
        data: Vec<String>,
    },
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s:?}: {e}"))
}

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=warn",
        env!("CARGO_CRATE_NAME")
    )));

    #[cfg(target_os = "linux")]
    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
        return;
    }

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

/// Vendor key for named detection: flag, then config, then adapter hint
fn vendor_key(cli: &Cli, config: &Config) -> String {
    if let Some(ref vendor) = cli.vendor {
        return vendor.trim().to_lowercase();
    }
    if let Some(ref vendor) = config.vendor_override {
        return vendor.clone();
    }
    cli.adapter
        .as_deref()
        .map(vendor_hint)
        .unwrap_or_default()
        .to_string()
}

fn parse_payload(tokens: &[String]) -> Result<Vec<u8>> {
    let values: Vec<SeqValue> = tokens.iter().map(|t| SeqValue::parse(t)).collect();
    Ok(bytes_from_sequence(&values)?)
}

fn driver(cache: &DetectionCache, vendor: &str) -> Result<SharedDriver> {
    match cache.driver_for(vendor) {
        Ok(driver) => Ok(driver),
        Err(e) if e.is_not_applicable() => bail!(describe_detection_error(vendor, &e)),
        Err(e) => Err(e).context("GPU driver detection failed"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logs();

    let config = match cli.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    let vendor = vendor_key(&cli, &config);
    debug!("vendor key {:?}", vendor);
    let cache = DetectionCache::new(Selector::new(backends::default_registry(&config)));

    match cli.command {
        Cmd::Probe => {
            let report = cache.report(&vendor);
            print!("{report}");
            if !report.available {
                bail!("no usable driver");
            }
        }
        Cmd::ReadDpcd { address, length } => {
            let data = driver(&cache, &vendor)?
                .read_dpcd(address, length)
                .with_context(|| format!("failed to read DPCD at 0x{address:05X}"))?;
            println!("{}", format_bytes(&data));
        }
        Cmd::WriteDpcd { address, ref data } => {
            let payload = parse_payload(data)?;
            driver(&cache, &vendor)?
                .write_dpcd(address, &payload)
                .with_context(|| format!("failed to write DPCD at 0x{address:05X}"))?;
        }
        Cmd::ReadI2c { address, length } => {
            let data = driver(&cache, &vendor)?
                .read_i2c(address, length)
                .with_context(|| format!("failed to read I2C at 0x{address:X}"))?;
            println!("{}", format_bytes(&data));
        }
        Cmd::WriteI2c { address, ref data } => {
            let payload = parse_payload(data)?;
            driver(&cache, &vendor)?
                .write_i2c(address, &payload)
                .with_context(|| format!("failed to write I2C at 0x{address:X}"))?;
        }
    }

    Ok(())
}
