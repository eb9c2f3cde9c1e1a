// Error taxonomy shared by the transport and the drivers

use crate::protocol::frame::Status;

/// Errors raised while validating input or talking to a slave board
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Bus error: {0}")]
    Bus(#[from] std::io::Error),

    #[error("Invalid value: {0}")]
    Validation(String),

    #[error("Checksum mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    Checksum { computed: u16, received: u16 },

    #[error("Device {device} answered with cmd 0x{cmd_id:02X} instead of STATUS")]
    ProtocolMismatch { device: usize, cmd_id: u8 },

    #[error("Device {device} rejected command 0x{register:02X}: {status:?}")]
    CommandRejected {
        device: usize,
        register: u8,
        status: Status,
    },

    #[error("Device {device} returned unknown status 0x{status:02X}")]
    UnknownStatus { device: usize, status: u8 },

    #[error("Timeout waiting for device {device} after {attempts} polls")]
    Timeout { device: usize, attempts: u32 },

    #[error("Motor {device} target step {target} is outside [{min}, {max}]")]
    OutOfRange {
        device: usize,
        target: i64,
        min: i32,
        max: i32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
