//! Scriptable transport for engine tests
//!
//! Requests are answered by a `DeviceSimulator` unless the behaviour says
//! otherwise. A `recv` with nothing pending sleeps for the whole timeout
//! and returns 0, so paused-clock tests see realistic timing.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use voltage_acquisition::modbus::FrameMode;
use voltage_acquisition::{AcqError, ConnectionParams, Result, Transport, TransportStats};

use super::simulator::DeviceSimulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer through the simulator
    Simulate,
    /// Accept requests but never answer
    Silent,
    /// Every send fails as if the link dropped
    SendFails,
    /// Answer with a frame carrying the wrong transaction id
    Garbage,
    /// Answer correctly, but only after the given delay
    Late(Duration),
}

#[derive(Debug)]
pub struct MockState {
    pub params: ConnectionParams,
    pub connected: bool,
    pub behavior: Behavior,
    pub fail_connect: bool,
    pub sim: DeviceSimulator,
    /// Every frame handed to `send`, including failed sends
    pub sent: Vec<Vec<u8>>,
    pub reconfigured: Vec<ConnectionParams>,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
    rx: VecDeque<u8>,
    /// Replies held back until their due time
    late: Vec<(Instant, Vec<u8>)>,
    stats: TransportStats,
    mode: FrameMode,
}

impl MockState {
    /// Move late replies whose time has come into the receive buffer
    fn deliver_due(&mut self) {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.late.drain(..).partition(|(at, _)| *at <= now);
        self.late = waiting;
        for (_, reply) in due {
            self.rx.extend(reply);
        }
    }
}

pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new(mode: FrameMode) -> Self {
        Self::with_params(mode, ConnectionParams::tcp("127.0.0.1", 502))
    }

    pub fn with_params(mode: FrameMode, params: ConnectionParams) -> Self {
        Self {
            state: Mutex::new(MockState {
                params,
                connected: false,
                behavior: Behavior::Simulate,
                fail_connect: false,
                sim: DeviceSimulator::new(),
                sent: Vec::new(),
                reconfigured: Vec::new(),
                connect_calls: 0,
                disconnect_calls: 0,
                rx: VecDeque::new(),
                late: Vec::new(),
                stats: TransportStats::default(),
                mode,
            }),
        }
    }

    /// Inspect or change the mock state
    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        self.with(|s| s.behavior = behavior);
    }

    pub fn sent_count(&self) -> usize {
        self.with(|s| s.sent.len())
    }

    /// Unit ids of every sent frame, in order
    pub fn sent_units(&self) -> Vec<u8> {
        self.with(|s| {
            let mode = s.mode;
            s.sent
                .iter()
                .map(|f| match mode {
                    FrameMode::Tcp => f[6],
                    FrameMode::Rtu => f[0],
                })
                .collect()
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        let mut s = self.state.lock();
        s.connect_calls += 1;
        if s.fail_connect {
            return Err(AcqError::Transport("connection refused".to_string()));
        }
        s.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut s = self.state.lock();
        s.disconnect_calls += 1;
        s.connected = false;
        s.rx.clear();
        s.late.clear();
    }

    async fn reconfigure(&self, params: ConnectionParams) -> Result<()> {
        let mut s = self.state.lock();
        s.connected = false;
        s.rx.clear();
        s.late.clear();
        s.reconfigured.push(params.clone());
        s.params = params;
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<usize> {
        let mut s = self.state.lock();
        s.sent.push(data.to_vec());
        if !s.connected {
            return Err(AcqError::NotConnected);
        }
        match s.behavior {
            Behavior::SendFails => {
                s.connected = false;
                return Err(AcqError::Transport("broken pipe".to_string()));
            },
            Behavior::Silent => {},
            Behavior::Simulate => {
                let mode = s.mode;
                if let Some(reply) = s.sim.respond(mode, data) {
                    s.rx.extend(reply);
                }
            },
            Behavior::Late(delay) => {
                let mode = s.mode;
                if let Some(reply) = s.sim.respond(mode, data) {
                    s.late.push((Instant::now() + delay, reply));
                }
            },
            Behavior::Garbage => {
                let mode = s.mode;
                if let Some(mut reply) = s.sim.respond(mode, data) {
                    reply[0] ^= 0xFF;
                    reply[1] ^= 0xFF;
                    s.rx.extend(reply);
                }
            },
        }
        s.stats.bytes_sent += data.len() as u64;
        Ok(data.len())
    }

    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let n = {
            let mut s = self.state.lock();
            if !s.connected {
                return Err(AcqError::NotConnected);
            }
            s.deliver_due();
            let n = buf.len().min(s.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = s.rx.pop_front().unwrap_or(0);
            }
            s.stats.bytes_received += n as u64;
            n
        };
        if n == 0 {
            tokio::time::sleep(timeout).await;
        }
        Ok(n)
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats
    }

    fn params(&self) -> ConnectionParams {
        self.state.lock().params.clone()
    }
}
