//! Word/byte order for multi-register values
//!
//! Modbus transfers registers big-endian, but devices disagree on how the
//! registers of a 32/64-bit value are arranged.

use serde::{Deserialize, Serialize};

/// Byte/word order of a multi-register value as it appears on the wire
///
/// # Naming Convention
/// Uses ABCD notation where A is the most significant byte.
///
/// For 32-bit value `0x12345678`:
/// - `BigEndian (ABCD)`: [0x12, 0x34, 0x56, 0x78]
/// - `LittleEndian (DCBA)`: [0x78, 0x56, 0x34, 0x12]
/// - `BigEndianSwap (CDAB)`: [0x56, 0x78, 0x12, 0x34] (Modbus common)
/// - `LittleEndianSwap (BADC)`: [0x34, 0x12, 0x78, 0x56]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    /// ABCD, network byte order
    #[default]
    #[serde(rename = "ABCD", alias = "abcd", alias = "big_endian")]
    BigEndian,

    /// DCBA
    #[serde(rename = "DCBA", alias = "dcba", alias = "little_endian")]
    LittleEndian,

    /// CDAB, big-endian words in swapped order
    #[serde(rename = "CDAB", alias = "cdab", alias = "big_endian_swap")]
    BigEndianSwap,

    /// BADC, byte-swapped words in natural order
    #[serde(rename = "BADC", alias = "badc", alias = "little_endian_swap")]
    LittleEndianSwap,
}

impl ByteOrder {
    /// All supported orders, handy for exhaustive tests
    pub const ALL: [ByteOrder; 4] = [
        ByteOrder::BigEndian,
        ByteOrder::LittleEndian,
        ByteOrder::BigEndianSwap,
        ByteOrder::LittleEndianSwap,
    ];

    /// Get descriptive name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigEndian => "ABCD",
            Self::LittleEndian => "DCBA",
            Self::BigEndianSwap => "CDAB",
            Self::LittleEndianSwap => "BADC",
        }
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reorder 4 bytes between wire order and big-endian
///
/// Every permutation here is its own inverse, so the same call converts
/// wire -> network order (decode) and network -> wire order (encode).
pub fn reorder_4(bytes: [u8; 4], order: ByteOrder) -> [u8; 4] {
    let [a, b, c, d] = bytes;
    match order {
        ByteOrder::BigEndian => [a, b, c, d],
        ByteOrder::LittleEndian => [d, c, b, a],
        ByteOrder::BigEndianSwap => [c, d, a, b],
        ByteOrder::LittleEndianSwap => [b, a, d, c],
    }
}

/// Reorder 8 bytes between wire order and big-endian (self-inverse)
pub fn reorder_8(bytes: [u8; 8], order: ByteOrder) -> [u8; 8] {
    let [a, b, c, d, e, f, g, h] = bytes;
    match order {
        ByteOrder::BigEndian => bytes,
        ByteOrder::LittleEndian => [h, g, f, e, d, c, b, a],
        ByteOrder::BigEndianSwap => [g, h, e, f, c, d, a, b],
        ByteOrder::LittleEndianSwap => [b, a, d, c, f, e, h, g],
    }
}
