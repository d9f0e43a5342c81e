//! VoltageEMS Modbus acquisition engine
//!
//! Compiles declared tags into optimized Modbus read/write commands and runs
//! them against field devices with retry, slave degradation and backup-link
//! switchover. Decoded values and per-tag errors are delivered to an
//! `OutputSink`.
//!
//! # Modules
//!
//! - `modbus`: point compiler, command batcher, codec, framing, engine
//! - `transport`: TCP and serial links
//! - `driver` / `poller`: driver trait and per-group polling tasks
//! - `config`: figment-based configuration loading
//! - `sink`: values, readings, metrics and the output trait

pub mod bytes;
pub mod config;
pub mod driver;
pub mod error;
pub mod modbus;
pub mod poller;
pub mod sink;
pub mod transport;

pub use config::{AcquisitionConfig, DeviceConfig, GroupConfig};
pub use driver::{Driver, Group, ModbusDriver};
pub use error::{AcqError, ErrorCode, Result};
pub use poller::DevicePoller;
pub use sink::{CycleMetrics, OutputSink, Reading, RequestToken, TraceToken, Value};
pub use transport::{ConnectionParams, LinkMode, Transport, TransportStats};
