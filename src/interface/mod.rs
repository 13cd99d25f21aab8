//! Byte transports for the SHTP link.
//!
//! The framer talks to the bus through the [`BusInterface`] capability set:
//! exact-length reads and writes, nothing else. The Linux two-wire transport
//! is one implementation; [`mock::MockBus`] is another, used by the test
//! suite and for offline replay of captured frame logs.

pub mod i2c;
pub mod mock;

pub use i2c::LinuxI2cBus;
pub use mock::MockBus;

use std::io;
use thiserror::Error;

/// Low-level transport faults.
///
/// The framer above requires exact-length semantics; a partial transfer on a
/// packet boundary is a protocol violation and is never silently tolerated.
#[derive(Debug, Error)]
pub enum BusError {
    /// OS-level transport fault
    #[error("bus i/o error: {0}")]
    Io(#[from] io::Error),

    /// Fewer octets arrived than requested
    #[error("short read: {got} of {want} octets")]
    ShortRead { got: usize, want: usize },

    /// Fewer octets left the host than requested
    #[error("short write: {wrote} of {want} octets")]
    ShortWrite { wrote: usize, want: usize },
}

/// Exact-length byte source/sink over the sensor bus.
pub trait BusInterface {
    /// Fill `buf` completely from the bus.
    ///
    /// An idle hub answers a read with an all-zero SHTP header; the framer
    /// interprets that as "no frame pending", so implementations must not
    /// block waiting for the hub to have something to say.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Transmit `buf` in one bus transaction.
    fn write_exact(&mut self, buf: &[u8]) -> Result<(), BusError>;
}
