//! Device startup and shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use voltage_acquisition::{
    transport, AcquisitionConfig, DeviceConfig, DevicePoller, Driver, ModbusDriver, OutputSink,
};

pub type Poller = DevicePoller<ModbusDriver>;

/// Build one poller per device and start all of its groups
///
/// Tags that cannot be compiled stay in their group; the driver reports
/// them to the sink on the first cycle.
pub fn start_devices(
    config: &AcquisitionConfig,
    sink: Arc<dyn OutputSink>,
    shutdown: &CancellationToken,
) -> Result<Vec<Poller>> {
    let mut pollers = Vec::with_capacity(config.devices.len());
    for device in &config.devices {
        let poller = start_device(device, Arc::clone(&sink), shutdown.child_token())
            .with_context(|| format!("Failed to start device {}", device.name))?;
        pollers.push(poller);
    }
    Ok(pollers)
}

fn start_device(
    device: &DeviceConfig,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
) -> Result<Poller> {
    let link = transport::open(
        device.connection.clone(),
        Duration::from_millis(device.settings.connect_timeout_ms),
    )?;
    let driver = ModbusDriver::new(
        device.name.clone(),
        device.settings.clone(),
        link,
        device.backup.clone(),
    );

    for group in &device.groups {
        for tag in &group.tags {
            if let Err(e) = driver.validate_tag(tag) {
                warn!("Device {} group {}: {}", device.name, group.name, e);
            }
        }
    }

    let mut poller = DevicePoller::new(driver, sink, cancel);
    for group in &device.groups {
        poller.add_group(group.to_group());
    }
    info!(
        "Device {} started on {} with {} group(s)",
        device.name,
        device.connection,
        device.groups.len()
    );
    Ok(poller)
}

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                match term_signal {
                    Some(mut sig) => {
                        sig.recv().await;
                    },
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
    }
}

/// Cancel every device and wait for running cycles to finish
pub async fn shutdown_devices(shutdown: CancellationToken, pollers: Vec<Poller>) {
    shutdown.cancel();
    for poller in pollers {
        poller.shutdown().await;
    }
}
