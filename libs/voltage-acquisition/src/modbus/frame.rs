//! Request framing and response reception
//!
//! TCP frames carry an MBAP header (transaction id, protocol id, length,
//! unit id); RTU frames carry the slave address and a CRC16 trailer. The
//! receiver reads the fixed header first and then exactly the bytes the
//! header (or the RTU function code) announces.

use std::time::Duration;

use tracing::{debug, warn};

use super::command_batcher::{ReadCommand, WriteCommand};
use super::constants;
use super::types::FrameMode;
use crate::bytes::{BufferError, FrameBuffer};
use crate::transport::Transport;

/// Failure classes of one request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Send failed or the link dropped
    Disconnected,
    /// Nothing arrived within the response window
    NoResponse,
    /// Header, length, checksum or echo mismatch
    DecodeFailure(String),
    /// Device answered with an exception code
    Exception(u8),
}

impl From<BufferError> for ExchangeError {
    fn from(err: BufferError) -> Self {
        ExchangeError::DecodeFailure(err.to_string())
    }
}

/// CRC16 (Modbus polynomial 0xA001, init 0xFFFF)
pub fn calculate_crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

// ============================================================================
// PDU builders
// ============================================================================

/// PDU of a read request
pub fn read_pdu(cmd: &ReadCommand) -> Result<Vec<u8>, BufferError> {
    let mut pdu = FrameBuffer::with_capacity(5);
    pdu.push_u8(cmd.function_code())?;
    pdu.push_u16(cmd.start_address)?;
    pdu.push_u16(cmd.count)?;
    Ok(pdu.into_vec())
}

/// PDU of a write request
pub fn write_pdu(cmd: &WriteCommand) -> Result<Vec<u8>, BufferError> {
    let mut pdu = FrameBuffer::with_capacity(constants::MAX_PDU_SIZE);
    pdu.push_u8(cmd.function_code)?;
    pdu.push_u16(cmd.start_address)?;
    match cmd.function_code {
        constants::FC_WRITE_SINGLE_COIL | constants::FC_WRITE_SINGLE_REGISTER => {
            pdu.extend(&cmd.payload)?;
        },
        _ => {
            let byte_count = u8::try_from(cmd.payload.len()).map_err(|_| BufferError::Overflow {
                needed: cmd.payload.len(),
                available: usize::from(u8::MAX),
            })?;
            pdu.push_u16(cmd.count)?;
            pdu.push_u8(byte_count)?;
            pdu.extend(&cmd.payload)?;
        },
    }
    Ok(pdu.into_vec())
}

// ============================================================================
// Response validation
// ============================================================================

/// Extract the data bytes of a read response, checking the byte count
pub fn read_response_data<'a>(pdu: &'a [u8], cmd: &ReadCommand) -> Result<&'a [u8], ExchangeError> {
    let expected = if cmd.area.is_bit_area() {
        usize::from(cmd.count).div_ceil(8)
    } else {
        usize::from(cmd.count) * 2
    };
    let mut buf = FrameBuffer::from_bytes(pdu);
    let _fc = buf.read_u8()?;
    let byte_count = usize::from(buf.read_u8()?);
    if byte_count != expected || buf.remaining() != expected {
        return Err(ExchangeError::DecodeFailure(format!(
            "byte count {} (payload {}) for {} units, expected {}",
            byte_count,
            buf.remaining(),
            cmd.count,
            expected
        )));
    }
    Ok(&pdu[2..])
}

/// Check that a write response echoes the request
pub fn check_write_echo(pdu: &[u8], cmd: &WriteCommand) -> Result<(), ExchangeError> {
    let mut buf = FrameBuffer::from_bytes(pdu);
    let _fc = buf.read_u8()?;
    let address = buf.read_u16()?;
    let field = buf.read_u16()?;

    let expected_field = match cmd.function_code {
        constants::FC_WRITE_SINGLE_COIL | constants::FC_WRITE_SINGLE_REGISTER => {
            match cmd.payload.as_slice() {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                _ => {
                    return Err(ExchangeError::DecodeFailure(
                        "single write payload is not one register".to_string(),
                    ))
                },
            }
        },
        _ => cmd.count,
    };

    if address != cmd.start_address || field != expected_field {
        return Err(ExchangeError::DecodeFailure(format!(
            "write echo mismatch: address {address} field {field:#06X}, expected {} {expected_field:#06X}",
            cmd.start_address
        )));
    }
    Ok(())
}

// ============================================================================
// Frame processor
// ============================================================================

/// Wraps PDUs into TCP/RTU frames and reads matching responses
#[derive(Debug)]
pub struct FrameProcessor {
    mode: FrameMode,
    next_transaction_id: u16,
}

impl FrameProcessor {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            next_transaction_id: 1,
        }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Get next transaction ID, wrapping from 0xFFFF to 0
    pub fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Build a complete frame; returns the transaction id used (0 for RTU)
    pub fn build_frame(&mut self, unit_id: u8, pdu: &[u8]) -> Result<(u16, Vec<u8>), BufferError> {
        match self.mode {
            FrameMode::Tcp => {
                let tid = self.next_transaction_id();
                let mut frame = FrameBuffer::with_capacity(constants::MAX_TCP_FRAME);
                frame.push_u16(tid)?;
                frame.push_u16(constants::MODBUS_PROTOCOL_ID)?;
                frame.push_u16(0)?;
                frame.push_u8(unit_id)?;
                frame.extend(pdu)?;
                let length = (frame.len() - constants::MBAP_HEADER_LEN) as u16;
                frame.patch_u16(4, length)?;
                Ok((tid, frame.into_vec()))
            },
            FrameMode::Rtu => {
                let mut frame = FrameBuffer::with_capacity(constants::MAX_RTU_FRAME);
                frame.push_u8(unit_id)?;
                frame.extend(pdu)?;
                let crc = calculate_crc16(frame.as_slice());
                frame.push_u16_le(crc)?;
                Ok((0, frame.into_vec()))
            },
        }
    }

    /// Send one request and return the response PDU
    ///
    /// A device exception is returned as `ExchangeError::Exception`.
    pub async fn exchange(
        &mut self,
        transport: &dyn Transport,
        unit_id: u8,
        pdu: &[u8],
        response_timeout: Duration,
    ) -> Result<Vec<u8>, ExchangeError> {
        let request_fc = pdu.first().copied().unwrap_or(0);
        let (tid, frame) = self.build_frame(unit_id, pdu)?;

        // A late reply to an earlier request must not answer this one
        match transport.discard_pending().await {
            Ok(0) => {},
            Ok(n) => warn!("Discarded {}B of stale data before unit {} request", n, unit_id),
            Err(_) => return Err(ExchangeError::Disconnected),
        }

        debug!("TX unit={} fc={:02X} {}B", unit_id, request_fc, frame.len());
        if transport.send(&frame).await.is_err() {
            return Err(ExchangeError::Disconnected);
        }

        let response = match self.mode {
            FrameMode::Tcp => receive_tcp(transport, tid, unit_id, response_timeout).await?,
            FrameMode::Rtu => receive_rtu(transport, unit_id, response_timeout).await?,
        };

        let fc = response.first().copied().unwrap_or(0);
        if fc == request_fc | constants::EXCEPTION_BIT {
            let code = response.get(1).copied().unwrap_or(0);
            debug!("RX exception unit={} fc={:02X} code={:02X}", unit_id, fc, code);
            return Err(ExchangeError::Exception(code));
        }
        if fc != request_fc {
            return Err(ExchangeError::DecodeFailure(format!(
                "function code mismatch: sent {request_fc:02X}, got {fc:02X}"
            )));
        }
        Ok(response)
    }
}

/// Fill `buf` completely
///
/// Timing out before the first byte is `NoResponse`; timing out halfway
/// means a truncated frame.
async fn recv_exact(
    transport: &dyn Transport,
    buf: &mut [u8],
    wait: Duration,
    frame_started: bool,
) -> Result<(), ExchangeError> {
    let mut filled = 0;
    while filled < buf.len() {
        match transport.recv(&mut buf[filled..], wait).await {
            Ok(0) if filled == 0 && !frame_started => return Err(ExchangeError::NoResponse),
            Ok(0) => {
                return Err(ExchangeError::DecodeFailure(format!(
                    "truncated frame: {} of {} bytes",
                    filled,
                    buf.len()
                )))
            },
            Ok(n) => filled += n,
            Err(_) => return Err(ExchangeError::Disconnected),
        }
    }
    Ok(())
}

async fn receive_tcp(
    transport: &dyn Transport,
    tid: u16,
    unit_id: u8,
    wait: Duration,
) -> Result<Vec<u8>, ExchangeError> {
    let mut header = [0u8; constants::MBAP_HEADER_LEN];
    recv_exact(transport, &mut header, wait, false).await?;

    let mut mbap = FrameBuffer::from_bytes(&header);
    let rx_tid = mbap.read_u16()?;
    let protocol = mbap.read_u16()?;
    let length = usize::from(mbap.read_u16()?);

    if length < 2 || length > constants::MAX_MBAP_LENGTH {
        warn!("TCP invalid len: {}", length);
        return Err(ExchangeError::DecodeFailure(format!(
            "invalid MBAP length {length}"
        )));
    }

    let mut body = vec![0u8; length];
    recv_exact(transport, &mut body, wait, true).await?;

    if rx_tid != tid || protocol != constants::MODBUS_PROTOCOL_ID || body[0] != unit_id {
        return Err(ExchangeError::DecodeFailure(format!(
            "MBAP mismatch: tid {rx_tid}/{tid} protocol {protocol} unit {}/{unit_id}",
            body[0]
        )));
    }
    debug!("TCP RX: {}B", constants::MBAP_HEADER_LEN + length);
    body.remove(0);
    Ok(body)
}

async fn receive_rtu(
    transport: &dyn Transport,
    unit_id: u8,
    wait: Duration,
) -> Result<Vec<u8>, ExchangeError> {
    // address, function code and the first data byte decide the frame size
    let mut frame = vec![0u8; 3];
    recv_exact(transport, &mut frame, wait, false).await?;

    let fc = frame[1];
    let total = if fc & constants::EXCEPTION_BIT != 0 {
        5
    } else {
        match fc {
            constants::FC_READ_COILS
            | constants::FC_READ_DISCRETE_INPUTS
            | constants::FC_READ_HOLDING_REGISTERS
            | constants::FC_READ_INPUT_REGISTERS => 3 + usize::from(frame[2]) + 2,
            constants::FC_WRITE_SINGLE_COIL
            | constants::FC_WRITE_SINGLE_REGISTER
            | constants::FC_WRITE_MULTIPLE_COILS
            | constants::FC_WRITE_MULTIPLE_REGISTERS => 8,
            other => {
                return Err(ExchangeError::DecodeFailure(format!(
                    "unexpected RTU function code {other:02X}"
                )))
            },
        }
    };

    frame.resize(total, 0);
    recv_exact(transport, &mut frame[3..], wait, true).await?;

    let (body, trailer) = frame.split_at(total - 2);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    let computed = calculate_crc16(body);
    if received != computed {
        warn!("RTU CRC mismatch: got {:04X}, computed {:04X}", received, computed);
        return Err(ExchangeError::DecodeFailure("CRC mismatch".to_string()));
    }
    if body[0] != unit_id {
        return Err(ExchangeError::DecodeFailure(format!(
            "response from unit {}, expected {unit_id}",
            body[0]
        )));
    }
    debug!("RTU RX: {}B", total);
    Ok(body[1..].to_vec())
}
