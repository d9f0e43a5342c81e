//! TCP transport
//!
//! Client mode connects out with a timeout and `TCP_NODELAY`. Server mode
//! binds a listener and serves the most recent device that connected in.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{link_error, ConnectionParams, LinkMode, Transport, TransportStats};
use crate::error::{AcqError, Result};

struct TcpState {
    params: ConnectionParams,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

/// TCP link (client or server mode)
pub struct TcpTransport {
    state: Mutex<TcpState>,
    /// Mirror of `state.params` readable without awaiting the lock
    params: parking_lot::Mutex<ConnectionParams>,
    connect_timeout: Duration,
    connected: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TcpTransport {
    pub fn new(params: ConnectionParams, connect_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(TcpState {
                params: params.clone(),
                listener: None,
                stream: None,
            }),
            params: parking_lot::Mutex::new(params),
            connect_timeout,
            connected: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    async fn connect_client(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                Ok(stream)
            },
            Ok(Err(e)) => {
                warn!("TCP connect failed: {} - {}", addr, e);
                Err(AcqError::Transport(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                warn!("TCP connect timeout: {}", addr);
                Err(AcqError::Timeout(format!("Connection to {addr} timed out")))
            },
        }
    }

    async fn accept_device(&self, state: &mut TcpState, host: &str, port: u16) -> Result<TcpStream> {
        if state.listener.is_none() {
            let addr = format!("{host}:{port}");
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| link_error(&format!("bind {addr}"), e))?;
            info!("TCP listening: {}", addr);
            state.listener = Some(listener);
        }
        let Some(listener) = state.listener.as_ref() else {
            return Err(AcqError::NotConnected);
        };

        match timeout(self.connect_timeout, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP device connected from {}", peer);
                Ok(stream)
            },
            Ok(Err(e)) => Err(link_error("accept", e)),
            Err(_) => Err(AcqError::Timeout(
                "no device connected within the connect timeout".to_string(),
            )),
        }
    }

    fn mark_down(&self, state: &mut TcpState) {
        state.stream = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.stream.is_some() {
            return Ok(());
        }

        let ConnectionParams::Tcp { host, port, mode } = state.params.clone() else {
            return Err(AcqError::Config(
                "TCP transport given non-TCP parameters".to_string(),
            ));
        };

        let stream = match mode {
            LinkMode::Client => self.connect_client(&host, port).await?,
            LinkMode::Server => self.accept_device(&mut state, &host, port).await?,
        };
        state.stream = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut stream) = state.stream.take() {
            let _ = stream.shutdown().await;
            debug!("TCP disconnected: {}", state.params);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn reconfigure(&self, params: ConnectionParams) -> Result<()> {
        if !matches!(params, ConnectionParams::Tcp { .. }) {
            return Err(AcqError::Config(
                "TCP transport cannot switch to a serial link".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        info!("TCP reconfigure: {} -> {}", state.params, params);
        self.mark_down(&mut state);
        state.listener = None;
        state.params = params.clone();
        *self.params.lock() = params;
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let Some(stream) = state.stream.as_mut() else {
            return Err(AcqError::NotConnected);
        };
        if let Err(e) = stream.write_all(data).await {
            warn!("TCP TX: {}", e);
            self.mark_down(&mut state);
            return Err(link_error("TCP send", e));
        }
        self.bytes_sent
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data.len())
    }

    async fn recv(&self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        let mut state = self.state.lock().await;
        let Some(stream) = state.stream.as_mut() else {
            return Err(AcqError::NotConnected);
        };
        match timeout(wait, stream.read(buf)).await {
            Ok(Ok(0)) => {
                warn!("TCP peer closed the connection");
                self.mark_down(&mut state);
                Err(AcqError::NotConnected)
            },
            Ok(Ok(n)) => {
                self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                Ok(n)
            },
            Ok(Err(e)) => {
                warn!("TCP RX: {}", e);
                self.mark_down(&mut state);
                Err(link_error("TCP recv", e))
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
