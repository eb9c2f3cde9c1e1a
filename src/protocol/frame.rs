// Frame codec for the slave board protocol
//
// Request:  [register, payload..., crc_lo, crc_hi]
// Response: [cmd_id (STATUS), status, crc_lo, crc_hi]
//
// The checksum is CRC-16/XMODEM over every byte before it.

use crc::{CRC_16_XMODEM, Crc};
use tracing::warn;

use crate::error::{Error, Result};

/// Reserved command id carried by every response
pub const CMD_STATUS: u8 = 0x10;

/// Length of a status response, checksum included
pub const STATUS_LEN: usize = 4;

const CRC_LEN: usize = 2;

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Command registers understood by the slave boards
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Brightness = 0x20,
    Rotate = 0x30,
    Power = 0x31,
    MaxIndex = 0x32,
    IndexStep = 0x33,
    DriveMode = 0x34,
}

/// Status codes a slave reports after a command
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success = 0x00,
    WrongChecksum = 0x01,
    UnknownCommand = 0x02,
    NotReady = 0x03,
    InvalidValue = 0x04,
}

impl Status {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Status::Success),
            0x01 => Some(Status::WrongChecksum),
            0x02 => Some(Status::UnknownCommand),
            0x03 => Some(Status::NotReady),
            0x04 => Some(Status::InvalidValue),
            _ => None,
        }
    }
}

/// CRC-16/XMODEM: polynomial 0x1021, initial value 0, no reflection
pub fn crc16(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}

/// Build a request frame with the checksum appended little-endian
pub fn encode(register: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len() + CRC_LEN);
    frame.push(register);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Verify a status response and return `(cmd_id, status)` undecoded
pub fn decode_status(response: &[u8; STATUS_LEN]) -> Result<(u8, u8)> {
    let computed = crc16(&response[..STATUS_LEN - CRC_LEN]);
    let received = u16::from_le_bytes([response[2], response[3]]);
    if computed != received {
        warn!(
            "Checksum error: 0x{:04X} vs. 0x{:04X} for {:02X?}",
            computed,
            received,
            &response[..2]
        );
        return Err(Error::Checksum { computed, received });
    }
    Ok((response[0], response[1]))
}
