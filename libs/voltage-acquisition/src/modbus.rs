//! Modbus acquisition
//!
//! Tag compiling, command batching, framing, value codec, slave health and
//! the execution engine that ties them together.

pub mod codec;
pub mod command_batcher;
pub mod constants;
pub mod engine;
pub mod frame;
pub mod health;
pub mod point;
pub mod types;

pub use command_batcher::{CommandSet, ReadCommand, ReadSet, WriteCommand, WriteSet};
pub use engine::ModbusEngine;
pub use health::{SlaveHealthTable, SlaveStatus};
pub use types::{
    Area, DataType, FrameMode, ModbusSettings, Point, StringEncoding, TagDeclaration, TagOptions,
};
