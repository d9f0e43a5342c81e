//! Output sink
//!
//! Decoded values, per-tag errors, write completions and cycle metrics all
//! leave the engine through the `OutputSink` trait.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Typed value decoded from (or encoded to) the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bit(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Numeric view used for write coercion; `None` for text and raw bytes
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bit(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int16(v) => Some(f64::from(*v)),
            Value::Uint16(v) => Some(f64::from(*v)),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Uint32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Uint64(v) => Some(*v as f64),
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::String(_) | Value::Bytes(_) => None,
        }
    }

    /// Integer view that keeps full 64-bit precision
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Bit(b) => Some(i128::from(*b)),
            Value::Int16(v) => Some(i128::from(*v)),
            Value::Uint16(v) => Some(i128::from(*v)),
            Value::Int32(v) => Some(i128::from(*v)),
            Value::Uint32(v) => Some(i128::from(*v)),
            Value::Int64(v) => Some(i128::from(*v)),
            Value::Uint64(v) => Some(i128::from(*v)),
            Value::Float(v) => Some(v.round() as i128),
            Value::Double(v) => Some(v.round() as i128),
            Value::String(_) | Value::Bytes(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bit(v) => write!(f, "{}", u8::from(*v)),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Uint16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Uint32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Uint64(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => {
                for byte in v {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            },
        }
    }
}

/// One tag's outcome for a cycle: a value or an explicit error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Value(Value),
    Error(ErrorCode),
}

impl Reading {
    pub fn is_error(&self) -> bool {
        matches!(self, Reading::Error(_))
    }
}

/// Aggregate metrics of the last executed cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleMetrics {
    /// Transport bytes sent during the cycle
    pub bytes_sent: u64,
    /// Transport bytes received during the cycle
    pub bytes_received: u64,
    /// RTT of the last command (sentinel on disconnect/decode failure)
    pub last_rtt_ms: u64,
    /// Commands put on the wire, retries included
    pub commands_sent: u32,
    /// Commands whose final outcome was an error
    pub commands_failed: u32,
}

/// Identifies a pending write request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestToken(pub u64);

/// Opaque trace context attached to an update
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceToken(pub String);

/// Receiver of everything the engine produces
pub trait OutputSink: Send + Sync {
    /// Push one reading for one tag
    fn update(&self, group: &str, tag: &str, reading: Reading);

    /// Push one reading with a trace token
    fn update_with_trace(&self, group: &str, tag: &str, reading: Reading, trace: &TraceToken) {
        let _ = trace;
        self.update(group, tag, reading);
    }

    /// Complete a pending write request
    fn write_response(&self, token: RequestToken, result: Result<(), ErrorCode>);

    /// Publish aggregate metrics after a cycle
    fn publish_metrics(&self, device: &str, metrics: &CycleMetrics) {
        let _ = (device, metrics);
    }
}
