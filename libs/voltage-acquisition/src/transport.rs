//! Transport collaborator
//!
//! Byte-level links the engine talks through. A transport owns its own
//! locking so it can be shared between the polling task and anything that
//! reconfigures it (backup switchover, explicit reconnect).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AcqError, Result};

pub mod tcp;

#[cfg(feature = "rtu")]
pub mod serial;

#[cfg(feature = "rtu")]
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// Upper bound on reads per `discard_pending` call on a chatty line
const MAX_DISCARD_READS: usize = 16;

/// Who opens the TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Gateway connects out to the device
    #[default]
    Client,
    /// Gateway listens and the device connects in
    Server,
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Where and how to reach a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionParams {
    Tcp {
        host: String,
        port: u16,
        #[serde(default)]
        mode: LinkMode,
    },
    Serial {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
        #[serde(default)]
        parity: Parity,
    },
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}

impl ConnectionParams {
    /// TCP client parameters
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ConnectionParams::Tcp {
            host: host.into(),
            port,
            mode: LinkMode::Client,
        }
    }

    /// Serial links always behave as clients
    pub fn link_mode(&self) -> LinkMode {
        match self {
            ConnectionParams::Tcp { mode, .. } => *mode,
            ConnectionParams::Serial { .. } => LinkMode::Client,
        }
    }
}

impl std::fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionParams::Tcp { host, port, mode } => match mode {
                LinkMode::Client => write!(f, "tcp://{host}:{port}"),
                LinkMode::Server => write!(f, "tcp-listen://{host}:{port}"),
            },
            ConnectionParams::Serial {
                port, baud_rate, ..
            } => write!(f, "serial://{port}@{baud_rate}"),
        }
    }
}

/// Cumulative byte counters of a transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Byte link to a device
///
/// `recv` returns `Ok(0)` when nothing arrived within `timeout`; errors from
/// `send`/`recv` mean the link is gone.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link; no-op when already connected
    async fn connect(&self) -> Result<()>;

    /// Drop the link; the next `connect` opens a fresh one
    async fn disconnect(&self);

    /// Point the transport at new parameters, dropping the current link
    async fn reconfigure(&self, params: ConnectionParams) -> Result<()>;

    /// Send all bytes, returning how many were written
    async fn send(&self, data: &[u8]) -> Result<usize>;

    /// Receive up to `buf.len()` bytes
    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drop bytes already waiting on the link, such as a reply that arrived
    /// after its response window; returns how many were discarded
    async fn discard_pending(&self) -> Result<usize> {
        let mut scratch = [0u8; 256];
        let mut discarded = 0;
        for _ in 0..MAX_DISCARD_READS {
            let n = self.recv(&mut scratch, Duration::ZERO).await?;
            if n == 0 {
                break;
            }
            discarded += n;
        }
        Ok(discarded)
    }

    fn is_connected(&self) -> bool;

    fn stats(&self) -> TransportStats;

    /// Parameters currently in use
    fn params(&self) -> ConnectionParams;
}

/// Create the transport matching `params`
pub fn open(params: ConnectionParams, connect_timeout: Duration) -> Result<Arc<dyn Transport>> {
    match params {
        ConnectionParams::Tcp { .. } => Ok(Arc::new(TcpTransport::new(params, connect_timeout))),
        #[cfg(feature = "rtu")]
        ConnectionParams::Serial { .. } => Ok(Arc::new(SerialTransport::new(params))),
        #[cfg(not(feature = "rtu"))]
        ConnectionParams::Serial { .. } => Err(AcqError::Config(
            "serial transport requires the 'rtu' feature".to_string(),
        )),
    }
}

/// Map an I/O failure on a live link to a transport error
pub(crate) fn link_error(context: &str, err: std::io::Error) -> AcqError {
    AcqError::Transport(format!("{context}: {err}"))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_params_from_yaml_defaults() {
        let params: ConnectionParams =
            serde_yaml::from_str("type: serial\nport: /dev/ttyUSB0\n").unwrap();
        assert_eq!(
            params,
            ConnectionParams::Serial {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: Parity::None,
            }
        );
        assert_eq!(params.link_mode(), LinkMode::Client);
    }

    #[test]
    fn test_tcp_server_mode() {
        let params: ConnectionParams =
            serde_yaml::from_str("type: tcp\nhost: 0.0.0.0\nport: 1502\nmode: server\n").unwrap();
        assert_eq!(params.link_mode(), LinkMode::Server);
        assert_eq!(params.to_string(), "tcp-listen://0.0.0.0:1502");
    }

    #[test]
    fn test_display_client() {
        assert_eq!(
            ConnectionParams::tcp("10.0.0.5", 502).to_string(),
            "tcp://10.0.0.5:502"
        );
    }
}
