//! Binary data processing utilities
//!
//! Byte/word ordering for multi-register values and the bounds-checked
//! frame buffer used to pack and unpack Modbus frames.

pub mod buffer;
pub mod byte_order;

pub use buffer::{BufferError, FrameBuffer};
pub use byte_order::{reorder_4, reorder_8, ByteOrder};
