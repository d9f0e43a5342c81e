//! Serial transport for RTU links

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use super::{link_error, ConnectionParams, Parity, Transport, TransportStats};
use crate::error::{AcqError, Result};

struct SerialState {
    params: ConnectionParams,
    port: Option<SerialStream>,
}

/// Serial port link
pub struct SerialTransport {
    state: Mutex<SerialState>,
    params: parking_lot::Mutex<ConnectionParams>,
    connected: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl SerialTransport {
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            state: Mutex::new(SerialState {
                params: params.clone(),
                port: None,
            }),
            params: parking_lot::Mutex::new(params),
            connected: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    fn open_port(params: &ConnectionParams) -> Result<SerialStream> {
        let ConnectionParams::Serial {
            port,
            baud_rate,
            data_bits,
            stop_bits,
            parity,
        } = params
        else {
            return Err(AcqError::Config(
                "serial transport given non-serial parameters".to_string(),
            ));
        };

        debug!("RTU: {} @{}baud", port, baud_rate);

        let parity = match parity {
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::None => tokio_serial::Parity::None,
        };
        let data_bits = match data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let stop_bits = match stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        tokio_serial::new(port.as_str(), *baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .open_native_async()
            .map_err(|e| AcqError::Transport(format!("Failed to open serial port {port}: {e}")))
    }

    fn mark_down(&self, state: &mut SerialState) {
        state.port = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.port.is_some() {
            return Ok(());
        }
        let port = Self::open_port(&state.params)?;
        info!("RTU opened: {}", state.params);
        state.port = Some(port);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if state.port.take().is_some() {
            debug!("RTU closed: {}", state.params);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn reconfigure(&self, params: ConnectionParams) -> Result<()> {
        if !matches!(params, ConnectionParams::Serial { .. }) {
            return Err(AcqError::Config(
                "serial transport cannot switch to a TCP link".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        info!("RTU reconfigure: {} -> {}", state.params, params);
        self.mark_down(&mut state);
        state.params = params.clone();
        *self.params.lock() = params;
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let Some(port) = state.port.as_mut() else {
            return Err(AcqError::NotConnected);
        };
        let written = async {
            port.write_all(data).await?;
            port.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("RTU TX: {}", e);
            self.mark_down(&mut state);
            return Err(link_error("serial send", e));
        }
        self.bytes_sent
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data.len())
    }

    async fn recv(&self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        let mut state = self.state.lock().await;
        let Some(port) = state.port.as_mut() else {
            return Err(AcqError::NotConnected);
        };
        match timeout(wait, port.read(buf)).await {
            Ok(Ok(n)) => {
                self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                Ok(n)
            },
            Ok(Err(e)) => {
                warn!("RTU RX: {}", e);
                self.mark_down(&mut state);
                Err(link_error("serial recv", e))
            },
            Err(_) => Ok(0),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    fn params(&self) -> ConnectionParams {
        self.params.lock().clone()
    }
}
