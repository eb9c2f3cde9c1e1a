// Two-wire bus access
//
// The transport only needs to address a slave, write a frame and read a
// fixed-size reply. `I2cBus` adapts any embedded-hal I2C implementation,
// `DryRunBus` performs no I/O at all.

use std::io;

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What an address-only write tells about a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaveStatus {
    /// The slave acknowledged its address
    Alive,
    /// The bus was in use, so the slave may still be there
    Busy,
    Dead,
}

impl SlaveStatus {
    /// Busy slaves count as alive
    pub fn is_alive(self) -> bool {
        !matches!(self, SlaveStatus::Dead)
    }
}

/// Blocking byte channel to the slave boards
pub trait Bus {
    /// Address the slave that receives subsequent reads and writes
    fn select(&mut self, address: u8) -> io::Result<()>;

    /// Write a frame to the selected slave, returning the bytes written
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Fill `buf` from the selected slave, blocking until it is full
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Address-only write to see whether the slave acknowledges
    fn probe(&mut self, address: u8) -> io::Result<SlaveStatus>;

    /// A dry-run bus never answers, so the transport must not poll it
    fn is_dry_run(&self) -> bool {
        false
    }
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn select(&mut self, address: u8) -> io::Result<()> {
        (**self).select(address)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).write(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read(buf)
    }

    fn probe(&mut self, address: u8) -> io::Result<SlaveStatus> {
        (**self).probe(address)
    }

    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }
}

/// Bus over an embedded-hal I2C master (e.g. `linux_embedded_hal::I2cdev`)
pub struct I2cBus<I> {
    i2c: I,
    address: Option<u8>,
}

impl<I: I2c> I2cBus<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c, address: None }
    }

    fn selected(&self) -> io::Result<u8> {
        self.address.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no slave address selected")
        })
    }

    /// Give back the underlying I2C master
    pub fn release(self) -> I {
        self.i2c
    }
}

fn hal_error<E: embedded_hal::i2c::Error>(e: E) -> io::Error {
    io::Error::other(format!("I2C error: {:?}", e.kind()))
}

impl<I: I2c> Bus for I2cBus<I> {
    fn select(&mut self, address: u8) -> io::Result<()> {
        self.address = Some(address);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let address = self.selected()?;
        self.i2c.write(address, bytes).map_err(hal_error)?;
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let address = self.selected()?;
        self.i2c.read(address, buf).map_err(hal_error)
    }

    fn probe(&mut self, address: u8) -> io::Result<SlaveStatus> {
        match self.i2c.write(address, &[]) {
            Ok(()) => Ok(SlaveStatus::Alive),
            Err(e) => match e.kind() {
                ErrorKind::Bus | ErrorKind::ArbitrationLoss => {
                    warn!("Bus busy while addressing 0x{:02X}: {:?}", address, e.kind());
                    Ok(SlaveStatus::Busy)
                }
                kind => {
                    debug!("No answer from 0x{:02X}: {:?}", address, kind);
                    Ok(SlaveStatus::Dead)
                }
            },
        }
    }
}

/// Bus that performs no I/O; every write is logged and kept for inspection
#[derive(Debug, Default)]
pub struct DryRunBus {
    address: Option<u8>,
    writes: Vec<(u8, Vec<u8>)>,
}

impl DryRunBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written so far, paired with the address they went to
    pub fn writes(&self) -> &[(u8, Vec<u8>)] {
        &self.writes
    }
}

impl Bus for DryRunBus {
    fn select(&mut self, address: u8) -> io::Result<()> {
        self.address = Some(address);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let address = self.address.unwrap_or_default();
        info!("[dry-run] write to 0x{:02X}: {:02X?}", address, bytes);
        self.writes.push((address, bytes.to_vec()));
        Ok(bytes.len())
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "dry-run bus has nothing to read",
        ))
    }

    fn probe(&mut self, _address: u8) -> io::Result<SlaveStatus> {
        Ok(SlaveStatus::Alive)
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}
