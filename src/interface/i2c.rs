//! Linux i2c-dev transport.
//!
//! Opens `/dev/i2c-<bus>` and binds the 7-bit slave address. The handle is
//! exclusive to its owner and released on drop, so teardown and fault paths
//! both close the bus deterministically.

use std::io;

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use super::{BusError, BusInterface};

pub struct LinuxI2cBus {
    dev: LinuxI2CDevice,
}

impl LinuxI2cBus {
    /// Open `/dev/i2c-<bus>` and bind the given 7-bit slave address.
    pub fn open(bus: u8, addr: u16) -> Result<Self, BusError> {
        let path = format!("/dev/i2c-{}", bus);
        let dev = LinuxI2CDevice::new(&path, addr).map_err(io::Error::other)?;
        Ok(Self { dev })
    }
}

impl BusInterface for LinuxI2cBus {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        // An I2C read is a single transaction of buf.len() octets; the
        // driver reports anything less as an error.
        self.dev
            .read(buf)
            .map_err(|e| BusError::Io(io::Error::other(e)))
    }

    fn write_exact(&mut self, buf: &[u8]) -> Result<(), BusError> {
        self.dev
            .write(buf)
            .map_err(|e| BusError::Io(io::Error::other(e)))
    }
}
