//! Service bootstrap
//!
//! Command-line arguments, logging setup and the `--validate` dry run.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use voltage_acquisition::modbus::command_batcher::compile_reads;
use voltage_acquisition::AcquisitionConfig;

/// Command-line arguments for acqsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "acqsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus Acquisition Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short = 'c', long, env = "ACQ_CONFIG", default_value = "config/acqsrv.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Directory for daily rolling log files; console only when unset
    #[arg(long, env = "ACQ_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

/// Default filter when `RUST_LOG` is not set
fn default_filter(level: &str) -> String {
    format!("{level},acqsrv={level},voltage_acquisition={level}")
}

/// Initialize console and optional file logging
///
/// The returned guard flushes the file writer on drop and must live as
/// long as the service.
pub fn initialize_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(filter) => EnvFilter::new(filter),
        Err(_) => EnvFilter::new(default_filter(&args.log_level)),
    };

    let console_layer = fmt::layer().with_target(false).boxed();

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "acqsrv.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to init logging")?;
    Ok(guard)
}

/// Load the configuration and compile every group without connecting
pub fn validate_configuration(path: &Path) -> Result<()> {
    let config = AcquisitionConfig::load(path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;
    info!("Found {} device(s)", config.devices.len());

    let mut rejected = 0usize;
    for device in &config.devices {
        info!("  Device {}: {}", device.name, device.connection);
        for group in &device.groups {
            let plan = compile_reads(
                &group.tags,
                device.settings.address_base,
                device.settings.max_read_payload,
            );
            info!(
                "    Group {} every {}ms: {} tags, {} commands",
                group.name,
                group.interval_ms,
                group.tags.len(),
                plan.commands.len()
            );
            for (tag, code) in &plan.rejected {
                warn!("    Tag {} rejected: {}", tag, code);
            }
            rejected += plan.rejected.len();
        }
    }

    if rejected > 0 {
        bail!("{rejected} tag(s) cannot be acquired");
    }
    Ok(())
}
