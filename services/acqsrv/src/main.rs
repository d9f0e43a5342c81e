//! Modbus Acquisition Service (`acqsrv`)
//!
//! Loads the device configuration, polls every group on its interval and
//! publishes values through the log sink until Ctrl+C or SIGTERM.

mod bootstrap;
mod log_sink;
mod runtime;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bootstrap::Args;
use log_sink::LogSink;
use voltage_acquisition::{AcquisitionConfig, OutputSink};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = bootstrap::initialize_logging(&args)?;

    // Validation mode: validate and exit
    if args.validate {
        if let Err(e) = bootstrap::validate_configuration(&args.config) {
            error!("Validation failed: {:#}", e);
            return Err(e);
        }
        info!("Validation completed successfully");
        return Ok(());
    }

    info!("Loading configuration from {}", args.config.display());
    let config = AcquisitionConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let shutdown = CancellationToken::new();
    let sink: Arc<dyn OutputSink> = Arc::new(LogSink);
    let pollers = runtime::start_devices(&config, sink, &shutdown)?;
    info!("acqsrv running with {} device(s)", pollers.len());

    runtime::wait_for_shutdown().await;
    info!("Shutdown signal received");

    runtime::shutdown_devices(shutdown, pollers).await;
    info!("acqsrv stopped");
    Ok(())
}
