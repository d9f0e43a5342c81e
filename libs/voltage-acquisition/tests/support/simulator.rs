//! In-memory Modbus device
//!
//! Register banks per slave answering FC01-06, FC15 and FC16. Works on
//! whole TCP or RTU frames so it can sit behind a mock transport or a real
//! TCP listener.

use std::collections::{HashMap, HashSet};

use voltage_acquisition::modbus::constants::*;
use voltage_acquisition::modbus::frame::calculate_crc16;
use voltage_acquisition::modbus::FrameMode;

#[derive(Debug, Default, Clone)]
pub struct RegisterBank {
    pub coils: HashMap<u16, bool>,
    pub discrete_inputs: HashMap<u16, bool>,
    pub holding: HashMap<u16, u16>,
    pub input: HashMap<u16, u16>,
}

#[derive(Debug, Default, Clone)]
pub struct DeviceSimulator {
    banks: HashMap<u8, RegisterBank>,
    silent: HashSet<u8>,
    /// Answer every request with this exception code
    pub exception: Option<u8>,
}

impl DeviceSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn bank(&mut self, slave: u8) -> &mut RegisterBank {
        self.banks.entry(slave).or_default()
    }

    pub fn set_holding(&mut self, slave: u8, start: u16, values: &[u16]) {
        let bank = self.bank(slave);
        for (i, v) in values.iter().enumerate() {
            bank.holding.insert(start + i as u16, *v);
        }
    }

    pub fn set_input(&mut self, slave: u8, start: u16, values: &[u16]) {
        let bank = self.bank(slave);
        for (i, v) in values.iter().enumerate() {
            bank.input.insert(start + i as u16, *v);
        }
    }

    pub fn set_coil(&mut self, slave: u8, address: u16, on: bool) {
        self.bank(slave).coils.insert(address, on);
    }

    pub fn set_discrete(&mut self, slave: u8, address: u16, on: bool) {
        self.bank(slave).discrete_inputs.insert(address, on);
    }

    pub fn holding(&self, slave: u8, address: u16) -> u16 {
        self.banks
            .get(&slave)
            .and_then(|b| b.holding.get(&address).copied())
            .unwrap_or(0)
    }

    pub fn coil(&self, slave: u8, address: u16) -> bool {
        self.banks
            .get(&slave)
            .and_then(|b| b.coils.get(&address).copied())
            .unwrap_or(false)
    }

    /// Stop answering requests for a slave
    pub fn silence(&mut self, slave: u8) {
        self.silent.insert(slave);
    }

    pub fn wake(&mut self, slave: u8) {
        self.silent.remove(&slave);
    }

    /// Answer a complete request frame; `None` means no answer
    pub fn respond(&mut self, mode: FrameMode, frame: &[u8]) -> Option<Vec<u8>> {
        match mode {
            FrameMode::Tcp => {
                if frame.len() < 8 {
                    return None;
                }
                let tid = [frame[0], frame[1]];
                let unit = frame[6];
                let pdu = self.handle_pdu(unit, &frame[7..])?;
                let mut out = Vec::with_capacity(7 + pdu.len());
                out.extend_from_slice(&tid);
                out.extend_from_slice(&[0, 0]);
                out.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
                out.push(unit);
                out.extend_from_slice(&pdu);
                Some(out)
            },
            FrameMode::Rtu => {
                if frame.len() < 4 {
                    return None;
                }
                let body = &frame[..frame.len() - 2];
                let crc = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
                if crc != calculate_crc16(body) {
                    return None;
                }
                let unit = body[0];
                let pdu = self.handle_pdu(unit, &body[1..])?;
                let mut out = vec![unit];
                out.extend_from_slice(&pdu);
                let crc = calculate_crc16(&out);
                out.extend_from_slice(&crc.to_le_bytes());
                Some(out)
            },
        }
    }

    /// Answer a request PDU for one unit
    pub fn handle_pdu(&mut self, unit: u8, pdu: &[u8]) -> Option<Vec<u8>> {
        if self.silent.contains(&unit) || pdu.len() < 5 {
            return None;
        }
        let fc = pdu[0];
        if let Some(code) = self.exception {
            return Some(vec![fc | EXCEPTION_BIT, code]);
        }

        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let field = u16::from_be_bytes([pdu[3], pdu[4]]);
        let bank = self.bank(unit);

        let response = match fc {
            FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
                let source = if fc == FC_READ_COILS {
                    &bank.coils
                } else {
                    &bank.discrete_inputs
                };
                let mut bytes = vec![0u8; usize::from(field).div_ceil(8)];
                for i in 0..field {
                    if source.get(&(address + i)).copied().unwrap_or(false) {
                        bytes[usize::from(i / 8)] |= 1 << (i % 8);
                    }
                }
                let mut out = vec![fc, bytes.len() as u8];
                out.extend_from_slice(&bytes);
                out
            },
            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
                let source = if fc == FC_READ_HOLDING_REGISTERS {
                    &bank.holding
                } else {
                    &bank.input
                };
                let mut out = vec![fc, (field * 2) as u8];
                for i in 0..field {
                    let v = source.get(&(address + i)).copied().unwrap_or(0);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                out
            },
            FC_WRITE_SINGLE_COIL => {
                bank.coils.insert(address, field == COIL_ON);
                pdu[..5].to_vec()
            },
            FC_WRITE_SINGLE_REGISTER => {
                bank.holding.insert(address, field);
                pdu[..5].to_vec()
            },
            FC_WRITE_MULTIPLE_COILS => {
                let data = pdu.get(6..)?;
                for i in 0..field {
                    let on = (data[usize::from(i / 8)] >> (i % 8)) & 1 == 1;
                    bank.coils.insert(address + i, on);
                }
                pdu[..5].to_vec()
            },
            FC_WRITE_MULTIPLE_REGISTERS => {
                let data = pdu.get(6..)?;
                for i in 0..field {
                    let at = usize::from(i) * 2;
                    bank.holding
                        .insert(address + i, u16::from_be_bytes([data[at], data[at + 1]]));
                }
                pdu[..5].to_vec()
            },
            other => vec![other | EXCEPTION_BIT, 0x01],
        };
        Some(response)
    }
}
