//! Modbus protocol constants
//!
//! Frame sizes and quantity limits derive from the 253-byte PDU limit
//! (256-byte RS485 ADU minus address and CRC).

// ============================================================================
// Function Codes
// ============================================================================

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Set on the function code of a device exception response
pub const EXCEPTION_BIT: u8 = 0x80;

/// FC05 payload for ON / OFF
pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header as read before the payload:
/// Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size defined by the Modbus protocol
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Largest complete TCP frame
pub const MAX_TCP_FRAME: usize = MBAP_HEADER_LEN + MAX_MBAP_LENGTH;

/// Largest complete RTU frame: address + PDU + CRC
pub const MAX_RTU_FRAME: usize = 1 + MAX_PDU_SIZE + 2;

/// Modbus TCP protocol identifier
pub const MODBUS_PROTOCOL_ID: u16 = 0;

// ============================================================================
// Quantity Limits
// ============================================================================

/// FC03/FC04: (253 - 2) / 2
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC01/FC02
pub const MAX_READ_COILS: u16 = 2000;

/// FC16: (253 - 6) / 2
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// FC15: (253 - 6) * 8
pub const MAX_WRITE_COILS: u16 = 1968;

// ============================================================================
// Metrics
// ============================================================================

/// RTT recorded when a command ends in a disconnect or an undecodable frame
pub const RTT_MAX_SENTINEL_MS: u64 = 9999;
