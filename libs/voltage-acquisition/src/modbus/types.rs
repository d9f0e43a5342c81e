//! Modbus data types and configuration
//!
//! Contains tag declarations as configured by users, the compiled `Point`
//! descriptor and the per-device engine settings.

use serde::{Deserialize, Serialize};

use super::constants;
use crate::bytes::ByteOrder;
use crate::error::{AcqError, Result};

/// Modbus memory area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl Area {
    /// Read function code for this area
    pub fn read_function_code(&self) -> u8 {
        match self {
            Area::Coil => constants::FC_READ_COILS,
            Area::DiscreteInput => constants::FC_READ_DISCRETE_INPUTS,
            Area::HoldingRegister => constants::FC_READ_HOLDING_REGISTERS,
            Area::InputRegister => constants::FC_READ_INPUT_REGISTERS,
        }
    }

    /// Coil and discrete-input areas are addressed in bits
    pub fn is_bit_area(&self) -> bool {
        matches!(self, Area::Coil | Area::DiscreteInput)
    }

    /// Only coils and holding registers accept writes
    pub fn is_writable(&self) -> bool {
        matches!(self, Area::Coil | Area::HoldingRegister)
    }

    /// Largest quantity a single read may request
    pub fn max_read_quantity(&self) -> u16 {
        if self.is_bit_area() {
            constants::MAX_READ_COILS
        } else {
            constants::MAX_READ_REGISTERS
        }
    }

    /// Largest quantity a single multi-write may carry
    pub fn max_write_quantity(&self) -> u16 {
        if self.is_bit_area() {
            constants::MAX_WRITE_COILS
        } else {
            constants::MAX_WRITE_REGISTERS
        }
    }
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Area::Coil => "coil",
            Area::DiscreteInput => "discrete_input",
            Area::InputRegister => "input_register",
            Area::HoldingRegister => "holding_register",
        };
        f.write_str(name)
    }
}

/// Declared value type of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bit,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
    String,
    Bytes,
}

impl DataType {
    /// Registers used by fixed-width numeric types
    pub fn fixed_register_count(&self) -> Option<u16> {
        match self {
            DataType::Bit | DataType::Int16 | DataType::Uint16 => Some(1),
            DataType::Int32 | DataType::Uint32 | DataType::Float => Some(2),
            DataType::Int64 | DataType::Uint64 | DataType::Double => Some(4),
            DataType::String | DataType::Bytes => None,
        }
    }
}

/// Layout of string characters inside registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StringEncoding {
    /// Two chars per register, high byte first
    #[default]
    #[serde(rename = "H", alias = "h")]
    High,
    /// Two chars per register, low byte first
    #[serde(rename = "L", alias = "l")]
    Low,
    /// One char per register, stored in the high byte
    #[serde(rename = "D", alias = "d")]
    HighOnly,
    /// One char per register, stored in the low byte
    #[serde(rename = "E", alias = "e")]
    LowOnly,
}

impl StringEncoding {
    /// Registers needed for `length` characters
    pub fn register_count(&self, length: u16) -> u16 {
        match self {
            StringEncoding::High | StringEncoding::Low => length.div_ceil(2),
            StringEncoding::HighOnly | StringEncoding::LowOnly => length,
        }
    }
}

/// Type-specific tag options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagOptions {
    /// Explicit byte order, overrides the device default for 32-bit values
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
    /// Bit offset inside a 16-bit register (bit tags in register areas)
    #[serde(default)]
    pub bit: Option<u8>,
    /// Length in bytes for string and bytes tags
    #[serde(default)]
    pub length: Option<u16>,
    /// Character layout for string tags
    #[serde(default)]
    pub string_encoding: StringEncoding,
}

/// User-declared tag with an already parsed protocol address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDeclaration {
    /// Tag name, unique within its group
    pub name: String,
    /// Modbus slave ID
    pub slave_id: u8,
    /// Memory area
    pub area: Area,
    /// Address as written by the user (0- or 1-origin, see `address_base`)
    pub address: u16,
    /// Declared value type
    pub data_type: DataType,
    /// Type-specific options
    #[serde(default)]
    pub options: TagOptions,
}

impl TagDeclaration {
    /// Create a tag without options
    pub fn new(
        name: impl Into<String>,
        slave_id: u8,
        area: Area,
        address: u16,
        data_type: DataType,
    ) -> Self {
        Self {
            name: name.into(),
            slave_id,
            area,
            address,
            data_type,
            options: TagOptions::default(),
        }
    }

    /// Set an explicit byte order
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.options.byte_order = Some(order);
        self
    }

    /// Set the bit offset
    pub fn with_bit(mut self, bit: u8) -> Self {
        self.options.bit = Some(bit);
        self
    }

    /// Set string/bytes length and string layout
    pub fn with_length(mut self, length: u16, encoding: StringEncoding) -> Self {
        self.options.length = Some(length);
        self.options.string_encoding = encoding;
        self
    }
}

/// Options carried into a compiled point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointOptions {
    /// Tag-level byte order; `None` means use the device default
    pub byte_order: Option<ByteOrder>,
    /// Bit offset inside a register (bit tags in register areas)
    pub bit: u8,
    /// Length in bytes for string and bytes tags
    pub length: u16,
    /// Character layout for string tags
    pub string_encoding: StringEncoding,
}

/// Compiled, protocol-ready descriptor of one tag
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub name: String,
    pub slave_id: u8,
    pub area: Area,
    /// 0-based wire address
    pub start_address: u16,
    /// Registers (register areas) or bits (bit areas)
    pub count: u16,
    pub data_type: DataType,
    pub options: PointOptions,
}

impl Point {
    /// One past the last address covered
    pub fn end_address(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.count)
    }
}

/// Wire framing variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// MBAP header, no checksum
    #[default]
    Tcp,
    /// Address + PDU + CRC16
    Rtu,
}

/// Per-device engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusSettings {
    /// 0- or 1-origin tag addresses
    #[serde(default = "default_address_base")]
    pub address_base: u8,
    /// Default byte order for 32-bit values
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Re-sends after a retryable failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before each retry (milliseconds)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Pacing delay between commands (milliseconds, 0 = none)
    #[serde(default)]
    pub command_interval_ms: u64,
    /// Skip slaves that keep failing
    #[serde(default)]
    pub degrade_enabled: bool,
    /// Consecutive failed cycles before a slave is skipped
    #[serde(default = "default_degrade_cycles")]
    pub degrade_cycles: u32,
    /// How long a degraded slave stays skipped (milliseconds)
    #[serde(default = "default_degrade_time_ms")]
    pub degrade_time_ms: u64,
    /// Wire framing
    #[serde(default)]
    pub frame_mode: FrameMode,
    /// Maximum registers (or bits) per read command
    #[serde(default = "default_max_read_payload")]
    pub max_read_payload: u16,
    /// Receive window per response (milliseconds)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Connect timeout (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_address_base() -> u8 {
    1
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_interval_ms() -> u64 {
    1000
}
fn default_degrade_cycles() -> u32 {
    3
}
fn default_degrade_time_ms() -> u64 {
    600_000
}
fn default_max_read_payload() -> u16 {
    constants::MAX_READ_REGISTERS
}
fn default_response_timeout_ms() -> u64 {
    3000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for ModbusSettings {
    fn default() -> Self {
        Self {
            address_base: default_address_base(),
            byte_order: ByteOrder::default(),
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            command_interval_ms: 0,
            degrade_enabled: false,
            degrade_cycles: default_degrade_cycles(),
            degrade_time_ms: default_degrade_time_ms(),
            frame_mode: FrameMode::default(),
            max_read_payload: default_max_read_payload(),
            response_timeout_ms: default_response_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ModbusSettings {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.address_base > 1 {
            return Err(AcqError::Config(format!(
                "address_base must be 0 or 1, got {}",
                self.address_base
            )));
        }
        if self.max_read_payload == 0 || self.max_read_payload > constants::MAX_READ_REGISTERS {
            return Err(AcqError::Config(format!(
                "max_read_payload must be in 1..={}, got {}",
                constants::MAX_READ_REGISTERS,
                self.max_read_payload
            )));
        }
        if self.degrade_enabled && self.degrade_cycles == 0 {
            return Err(AcqError::Config(
                "degrade_cycles must be at least 1 when degradation is enabled".to_string(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(AcqError::Config(
                "response_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    // ========== Area tests ==========

    #[test]
    fn test_area_function_codes() {
        assert_eq!(Area::Coil.read_function_code(), 0x01);
        assert_eq!(Area::DiscreteInput.read_function_code(), 0x02);
        assert_eq!(Area::HoldingRegister.read_function_code(), 0x03);
        assert_eq!(Area::InputRegister.read_function_code(), 0x04);
    }

    #[test]
    fn test_area_writability() {
        assert!(Area::Coil.is_writable());
        assert!(Area::HoldingRegister.is_writable());
        assert!(!Area::DiscreteInput.is_writable());
        assert!(!Area::InputRegister.is_writable());
    }

    // ========== DataType / StringEncoding tests ==========

    #[test]
    fn test_fixed_register_counts() {
        assert_eq!(DataType::Uint16.fixed_register_count(), Some(1));
        assert_eq!(DataType::Float.fixed_register_count(), Some(2));
        assert_eq!(DataType::Double.fixed_register_count(), Some(4));
        assert_eq!(DataType::String.fixed_register_count(), None);
    }

    #[test]
    fn test_string_register_count() {
        assert_eq!(StringEncoding::High.register_count(5), 3);
        assert_eq!(StringEncoding::Low.register_count(4), 2);
        assert_eq!(StringEncoding::HighOnly.register_count(5), 5);
        assert_eq!(StringEncoding::LowOnly.register_count(1), 1);
    }

    // ========== ModbusSettings tests ==========

    #[test]
    fn test_settings_default_values() {
        let settings = ModbusSettings::default();

        assert_eq!(settings.address_base, 1);
        assert_eq!(settings.byte_order, ByteOrder::BigEndian);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_interval_ms, 1000);
        assert_eq!(settings.command_interval_ms, 0);
        assert!(!settings.degrade_enabled);
        assert_eq!(settings.max_read_payload, 125);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation_rejects_bad_values() {
        let mut settings = ModbusSettings {
            address_base: 2,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.address_base = 0;
        settings.max_read_payload = 0;
        assert!(settings.validate().is_err());

        settings.max_read_payload = 126;
        assert!(settings.validate().is_err());

        settings.max_read_payload = 100;
        settings.degrade_enabled = true;
        settings.degrade_cycles = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_tag_declaration_builders() {
        let tag = TagDeclaration::new("flow", 1, Area::HoldingRegister, 10, DataType::Float)
            .with_byte_order(ByteOrder::BigEndianSwap);
        assert_eq!(tag.options.byte_order, Some(ByteOrder::BigEndianSwap));

        let tag = TagDeclaration::new("name", 1, Area::HoldingRegister, 20, DataType::String)
            .with_length(8, StringEncoding::Low);
        assert_eq!(tag.options.length, Some(8));
        assert_eq!(tag.options.string_encoding, StringEncoding::Low);
    }
}
