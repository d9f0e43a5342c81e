//! Value codec
//!
//! Converts between raw response bytes and typed `Value`s. Registers travel
//! big-endian; 32-bit values go through the word/byte reorder table of the
//! effective `ByteOrder`; 64-bit values use network order unless the tag
//! sets an explicit order. Coils and discrete inputs are packed LSB first.

use super::types::{Area, DataType, Point, StringEncoding};
use crate::bytes::{reorder_4, reorder_8, ByteOrder};
use crate::error::ErrorCode;
use crate::sink::Value;

/// Marker returned for text that is not valid UTF-8
pub const INVALID_TEXT: &str = "?";

// ============================================================================
// Decoding
// ============================================================================

/// Decode one point out of a read response
///
/// `data` is the response payload after the byte-count field and
/// `command_start` the first address the command requested.
pub fn decode_from_response(
    data: &[u8],
    command_start: u16,
    point: &Point,
    default_order: ByteOrder,
) -> Result<Value, ErrorCode> {
    let offset = usize::from(point.start_address.saturating_sub(command_start));

    if point.area.is_bit_area() {
        return extract_bit(data, offset)
            .map(Value::Bit)
            .ok_or(ErrorCode::ProtocolDecodeFailure);
    }

    let byte_offset = offset * 2;
    let byte_len = usize::from(point.count) * 2;
    let raw = data
        .get(byte_offset..byte_offset + byte_len)
        .ok_or(ErrorCode::ProtocolDecodeFailure)?;
    decode_registers(raw, point, default_order)
}

/// Extract a bit from an LSB-first packed coil/discrete-input payload
pub fn extract_bit(data: &[u8], bit_index: usize) -> Option<bool> {
    data.get(bit_index / 8)
        .map(|byte| (byte >> (bit_index % 8)) & 0x01 == 1)
}

/// Decode the register bytes that belong to one point
pub fn decode_registers(
    raw: &[u8],
    point: &Point,
    default_order: ByteOrder,
) -> Result<Value, ErrorCode> {
    let short = || ErrorCode::ProtocolDecodeFailure;

    let value = match point.data_type {
        DataType::Bit => {
            let reg = read_u16(raw).ok_or_else(short)?;
            Value::Bit((reg >> point.options.bit) & 0x01 == 1)
        },
        DataType::Int16 => Value::Int16(read_u16(raw).ok_or_else(short)? as i16),
        DataType::Uint16 => Value::Uint16(read_u16(raw).ok_or_else(short)?),
        DataType::Int32 | DataType::Uint32 | DataType::Float => {
            let wire: [u8; 4] = raw.get(..4).ok_or_else(short)?.try_into().map_err(|_| short())?;
            let order = point.options.byte_order.unwrap_or(default_order);
            let be = reorder_4(wire, order);
            match point.data_type {
                DataType::Int32 => Value::Int32(i32::from_be_bytes(be)),
                DataType::Uint32 => Value::Uint32(u32::from_be_bytes(be)),
                _ => Value::Float(f32::from_be_bytes(be)),
            }
        },
        DataType::Int64 | DataType::Uint64 | DataType::Double => {
            let wire: [u8; 8] = raw.get(..8).ok_or_else(short)?.try_into().map_err(|_| short())?;
            let order = point.options.byte_order.unwrap_or(ByteOrder::BigEndian);
            let be = reorder_8(wire, order);
            match point.data_type {
                DataType::Int64 => Value::Int64(i64::from_be_bytes(be)),
                DataType::Uint64 => Value::Uint64(u64::from_be_bytes(be)),
                _ => Value::Double(f64::from_be_bytes(be)),
            }
        },
        DataType::String => {
            let chars = unpack_chars(raw, point.options.string_encoding);
            Value::String(decode_text(&chars, usize::from(point.options.length)))
        },
        DataType::Bytes => {
            let length = usize::from(point.options.length);
            Value::Bytes(raw.get(..length).ok_or_else(short)?.to_vec())
        },
    };
    Ok(value)
}

fn read_u16(raw: &[u8]) -> Option<u16> {
    match raw {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Rearrange register bytes into character order
fn unpack_chars(raw: &[u8], encoding: StringEncoding) -> Vec<u8> {
    match encoding {
        StringEncoding::High => raw.to_vec(),
        StringEncoding::Low => raw
            .chunks(2)
            .flat_map(|pair| pair.iter().rev().copied())
            .collect(),
        StringEncoding::HighOnly => raw.chunks_exact(2).map(|reg| reg[0]).collect(),
        StringEncoding::LowOnly => raw.chunks_exact(2).map(|reg| reg[1]).collect(),
    }
}

/// Interpret up to `length` bytes as text, stopping at the first NUL
fn decode_text(chars: &[u8], length: usize) -> String {
    let limited = &chars[..chars.len().min(length)];
    let end = limited.iter().position(|&b| b == 0).unwrap_or(limited.len());
    match std::str::from_utf8(&limited[..end]) {
        Ok(text) => text.to_string(),
        Err(_) => INVALID_TEXT.to_string(),
    }
}

// ============================================================================
// Encoding (write path)
// ============================================================================

/// Coerce a value into a coil state: booleans, or any number (non-zero = on)
pub fn coerce_bit(value: &Value) -> Result<bool, ErrorCode> {
    match value {
        Value::Bit(b) => Ok(*b),
        other => other
            .as_f64()
            .map(|v| v != 0.0)
            .ok_or(ErrorCode::TypeMismatch),
    }
}

/// Clamp an integer to the range of a declared integer type
pub fn clamp_integer(value: i128, data_type: DataType) -> i128 {
    let (min, max) = match data_type {
        DataType::Int16 => (i128::from(i16::MIN), i128::from(i16::MAX)),
        DataType::Uint16 => (0, i128::from(u16::MAX)),
        DataType::Int32 => (i128::from(i32::MIN), i128::from(i32::MAX)),
        DataType::Uint32 => (0, i128::from(u32::MAX)),
        DataType::Int64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
        DataType::Uint64 => (0, i128::from(u64::MAX)),
        _ => return value,
    };
    value.clamp(min, max)
}

/// Clamp a float to the range of `float`/`double`
pub fn clamp_to_data_type(value: f64, data_type: DataType) -> f64 {
    match data_type {
        DataType::Float if value.is_finite() => value.clamp(f64::from(f32::MIN), f64::from(f32::MAX)),
        _ => value,
    }
}

/// Encode a value into the register bytes of one point (wire order)
///
/// Numeric values are clamped to the declared type; text and raw bytes are
/// zero-padded to the declared length and rejected when longer.
pub fn encode_registers(
    value: &Value,
    point: &Point,
    default_order: ByteOrder,
) -> Result<Vec<u8>, ErrorCode> {
    let integer = || value.as_i128().ok_or(ErrorCode::TypeMismatch);

    let bytes = match point.data_type {
        DataType::Bit => u16::from(coerce_bit(value)?).to_be_bytes().to_vec(),
        DataType::Int16 => (clamp_integer(integer()?, DataType::Int16) as i16)
            .to_be_bytes()
            .to_vec(),
        DataType::Uint16 => (clamp_integer(integer()?, DataType::Uint16) as u16)
            .to_be_bytes()
            .to_vec(),
        DataType::Int32 | DataType::Uint32 | DataType::Float => {
            let be = match point.data_type {
                DataType::Int32 => (clamp_integer(integer()?, DataType::Int32) as i32).to_be_bytes(),
                DataType::Uint32 => {
                    (clamp_integer(integer()?, DataType::Uint32) as u32).to_be_bytes()
                },
                _ => {
                    let v = value.as_f64().ok_or(ErrorCode::TypeMismatch)?;
                    (clamp_to_data_type(v, DataType::Float) as f32).to_be_bytes()
                },
            };
            let order = point.options.byte_order.unwrap_or(default_order);
            reorder_4(be, order).to_vec()
        },
        DataType::Int64 | DataType::Uint64 | DataType::Double => {
            let be = match point.data_type {
                DataType::Int64 => (clamp_integer(integer()?, DataType::Int64) as i64).to_be_bytes(),
                DataType::Uint64 => {
                    (clamp_integer(integer()?, DataType::Uint64) as u64).to_be_bytes()
                },
                _ => value
                    .as_f64()
                    .ok_or(ErrorCode::TypeMismatch)?
                    .to_be_bytes(),
            };
            let order = point.options.byte_order.unwrap_or(ByteOrder::BigEndian);
            reorder_8(be, order).to_vec()
        },
        DataType::String => {
            let Value::String(text) = value else {
                return Err(ErrorCode::TypeMismatch);
            };
            let chars = padded(text.as_bytes(), usize::from(point.options.length))?;
            pack_chars(&chars, point.options.string_encoding)
        },
        DataType::Bytes => {
            let Value::Bytes(raw) = value else {
                return Err(ErrorCode::TypeMismatch);
            };
            let mut bytes = padded(raw, usize::from(point.options.length))?;
            bytes.resize(usize::from(point.count) * 2, 0);
            bytes
        },
    };
    Ok(bytes)
}

fn padded(input: &[u8], length: usize) -> Result<Vec<u8>, ErrorCode> {
    if input.len() > length {
        return Err(ErrorCode::TypeMismatch);
    }
    let mut out = input.to_vec();
    out.resize(length, 0);
    Ok(out)
}

/// Lay characters out in registers, inverse of `unpack_chars`
fn pack_chars(chars: &[u8], encoding: StringEncoding) -> Vec<u8> {
    match encoding {
        StringEncoding::High | StringEncoding::Low => {
            let mut out = chars.to_vec();
            if out.len() % 2 == 1 {
                out.push(0);
            }
            if encoding == StringEncoding::Low {
                for pair in out.chunks_exact_mut(2) {
                    pair.swap(0, 1);
                }
            }
            out
        },
        StringEncoding::HighOnly => chars.iter().flat_map(|&c| [c, 0]).collect(),
        StringEncoding::LowOnly => chars.iter().flat_map(|&c| [0, c]).collect(),
    }
}

/// Pack coil states LSB first, as FC15 expects
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, on)| **on) {
        out[i / 8] |= 1 << (i % 8);
    }
    out
}

/// Encode the value of a point into its contribution to a write command
///
/// Returns packed coil bits for coil points and register bytes otherwise.
pub fn encode_for_write(
    value: &Value,
    point: &Point,
    default_order: ByteOrder,
) -> Result<WriteChunk, ErrorCode> {
    match point.area {
        Area::Coil => coerce_bit(value).map(WriteChunk::Coil),
        Area::HoldingRegister => encode_registers(value, point, default_order).map(WriteChunk::Registers),
        Area::DiscreteInput | Area::InputRegister => Err(ErrorCode::TagReadOnly),
    }
}

/// Encoded contribution of one point to a write command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteChunk {
    Coil(bool),
    Registers(Vec<u8>),
}
