//! WIZnet W5100 driver
//!
//! - [`bus`]: register access over SPI with a chip-select line, one mutex
//!   hold per logical access (the scheduler's mutex via [`TaskRawMutex`])
//! - [`chip`]: chip bring-up, common registers, socket command execution
//!   and buffer copies
//! - [`socket`]: Berkeley-style sockets on top of the chip
//!
//! The chip driver only needs [`RegisterAccess`]; the SPI client is one
//! implementation and the host tests use a simulated chip.

pub mod bus;
pub mod chip;
pub mod socket;

pub use bus::{BusClient, BusError, TaskBusClient, TaskRawMutex};
pub use chip::W5100;
pub use socket::{Socket, SocketError};

/// Byte-addressed access to the chip's register and buffer space
///
/// Each call is one logical access: implementations hold their bus lock
/// for the whole block so 16-bit registers are read consistently.
pub trait RegisterAccess {
    type Error;

    /// Read `buf.len()` bytes starting at `addr`
    fn read(&self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `data` starting at `addr`
    fn write(&self, addr: u16, data: &[u8]) -> Result<(), Self::Error>;

    fn read_u8(&self, addr: u16) -> Result<u8, Self::Error> {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn write_u8(&self, addr: u16, value: u8) -> Result<(), Self::Error> {
        self.write(addr, &[value])
    }

    /// Big-endian 16-bit register
    fn read_u16(&self, addr: u16) -> Result<u16, Self::Error> {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write_u16(&self, addr: u16, value: u16) -> Result<(), Self::Error> {
        self.write(addr, &value.to_be_bytes())
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &T {
    type Error = T::Error;

    fn read(&self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        T::read(self, addr, buf)
    }

    fn write(&self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        T::write(self, addr, data)
    }
}
