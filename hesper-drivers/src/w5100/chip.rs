//! Chip-level operations
//!
//! [`W5100`] owns the register access path and the table of claimed socket
//! handles. Sockets borrow it; everything here runs in task context.

use core::cell::Cell;
use core::marker::PhantomData;
use core::net::Ipv4Addr;

use critical_section::Mutex;
use hesper_hal::kernel::Kernel;
use hesper_net::config::{MacAddress, NetConfig};
use hesper_net::ports::{PortAllocator, EPHEMERAL_PORTS};
use hesper_net::regs::{common, mode, socket, socket_reg, Command, SocketInterrupt, MAX_SOCKETS};
use hesper_net::status::SocketStatus;
use hesper_net::window::{MemoryLayout, Window};

use super::socket::SocketError;
use super::RegisterAccess;

/// Polls of MR after a software reset before giving up
const RESET_POLLS: u32 = 100;

/// Polls of CR after issuing a socket command before giving up
const COMMAND_POLLS: u32 = 100;

/// Reads of a chip-maintained counter before giving up on agreement
const STABLE_READS: u32 = 8;

/// W5100 chip driver
pub struct W5100<A, K> {
    regs: A,
    layout: MemoryLayout,
    ports: &'static PortAllocator,
    /// Bit n set: socket n is owned by a `Socket`
    claimed: Mutex<Cell<u8>>,
    _kernel: PhantomData<fn() -> K>,
}

impl<A, K> W5100<A, K>
where
    A: RegisterAccess,
    K: Kernel,
{
    /// Wrap a register access path, allocating ports from the shared table
    pub fn new(regs: A) -> Self {
        Self::with_ports(regs, &EPHEMERAL_PORTS)
    }

    /// Wrap a register access path with a dedicated port table
    pub fn with_ports(regs: A, ports: &'static PortAllocator) -> Self {
        Self {
            regs,
            layout: MemoryLayout::even(MAX_SOCKETS),
            ports,
            claimed: Mutex::new(Cell::new(0)),
            _kernel: PhantomData,
        }
    }

    /// Reset the chip and program addressing, memory split and retries
    pub fn init(&self, config: &NetConfig) -> Result<(), SocketError<A::Error>> {
        self.regs.write_u8(common::MR, mode::RST)?;
        let mut polls = 0;
        while self.regs.read_u8(common::MR)? & mode::RST != 0 {
            polls += 1;
            if polls >= RESET_POLLS {
                error!("w5100: reset did not complete");
                return Err(SocketError::Timeout);
            }
            K::delay(1);
        }

        let size = self.layout.size_register();
        self.regs.write_u8(common::RMSR, size)?;
        self.regs.write_u8(common::TMSR, size)?;

        self.regs.write(common::GAR, &config.gateway)?;
        self.regs.write(common::SUBR, &config.subnet)?;
        self.regs.write(common::SHAR, &config.mac.octets())?;
        self.regs.write(common::SIPR, &config.ip)?;
        self.regs.write_u16(common::RTR, config.retry_time)?;
        self.regs.write_u8(common::RCR, config.retry_count)?;

        debug!("w5100: initialized, {} sockets", self.layout.sockets());
        Ok(())
    }

    pub fn registers(&self) -> &A {
        &self.regs
    }

    pub fn layout(&self) -> MemoryLayout {
        self.layout
    }

    pub(crate) fn ports(&self) -> &'static PortAllocator {
        self.ports
    }

    fn read_addr(&self, addr: u16) -> Result<Ipv4Addr, A::Error> {
        let mut octets = [0u8; 4];
        self.regs.read(addr, &mut octets)?;
        Ok(Ipv4Addr::from(octets))
    }

    pub fn gateway(&self) -> Result<Ipv4Addr, A::Error> {
        self.read_addr(common::GAR)
    }

    pub fn set_gateway(&self, addr: Ipv4Addr) -> Result<(), A::Error> {
        self.regs.write(common::GAR, &addr.octets())
    }

    pub fn subnet_mask(&self) -> Result<Ipv4Addr, A::Error> {
        self.read_addr(common::SUBR)
    }

    pub fn set_subnet_mask(&self, addr: Ipv4Addr) -> Result<(), A::Error> {
        self.regs.write(common::SUBR, &addr.octets())
    }

    pub fn ip_address(&self) -> Result<Ipv4Addr, A::Error> {
        self.read_addr(common::SIPR)
    }

    pub fn set_ip_address(&self, addr: Ipv4Addr) -> Result<(), A::Error> {
        self.regs.write(common::SIPR, &addr.octets())
    }

    pub fn mac_address(&self) -> Result<MacAddress, A::Error> {
        let mut octets = [0u8; 6];
        self.regs.read(common::SHAR, &mut octets)?;
        Ok(MacAddress(octets))
    }

    pub fn set_mac_address(&self, mac: MacAddress) -> Result<(), A::Error> {
        self.regs.write(common::SHAR, &mac.octets())
    }

    /// Retransmission timeout in 100 µs units
    pub fn retry_time(&self) -> Result<u16, A::Error> {
        self.regs.read_u16(common::RTR)
    }

    pub fn set_retry_time(&self, value: u16) -> Result<(), A::Error> {
        self.regs.write_u16(common::RTR, value)
    }

    pub fn retry_count(&self) -> Result<u8, A::Error> {
        self.regs.read_u8(common::RCR)
    }

    pub fn set_retry_count(&self, value: u8) -> Result<(), A::Error> {
        self.regs.write_u8(common::RCR, value)
    }

    // Socket registers

    pub(crate) fn read_socket_u8(&self, s: u8, offset: u16) -> Result<u8, A::Error> {
        self.regs.read_u8(socket_reg(s, offset))
    }

    pub(crate) fn write_socket_u8(&self, s: u8, offset: u16, value: u8) -> Result<(), A::Error> {
        self.regs.write_u8(socket_reg(s, offset), value)
    }

    pub(crate) fn read_socket_u16(&self, s: u8, offset: u16) -> Result<u16, A::Error> {
        self.regs.read_u16(socket_reg(s, offset))
    }

    pub(crate) fn write_socket_u16(&self, s: u8, offset: u16, value: u16) -> Result<(), A::Error> {
        self.regs.write_u16(socket_reg(s, offset), value)
    }

    pub(crate) fn read_socket(&self, s: u8, offset: u16, buf: &mut [u8]) -> Result<(), A::Error> {
        self.regs.read(socket_reg(s, offset), buf)
    }

    pub(crate) fn write_socket(&self, s: u8, offset: u16, data: &[u8]) -> Result<(), A::Error> {
        self.regs.write(socket_reg(s, offset), data)
    }

    /// Read a counter the chip updates on its own until two reads agree
    fn read_stable_u16(&self, s: u8, offset: u16) -> Result<u16, SocketError<A::Error>> {
        let mut previous = self.read_socket_u16(s, offset)?;
        for _ in 1..STABLE_READS {
            let current = self.read_socket_u16(s, offset)?;
            if current == previous {
                return Ok(current);
            }
            previous = current;
        }
        error!("w5100: socket {} counter {=u16:#x} never settled", s, offset);
        Err(SocketError::Timeout)
    }

    /// Free space in a socket's transmit buffer
    pub fn tx_free(&self, s: u8) -> Result<u16, SocketError<A::Error>> {
        self.read_stable_u16(s, socket::TX_FSR)
    }

    /// Bytes waiting in a socket's receive buffer
    pub fn rx_received(&self, s: u8) -> Result<u16, SocketError<A::Error>> {
        self.read_stable_u16(s, socket::RX_RSR)
    }

    pub fn status(&self, s: u8) -> Result<SocketStatus, A::Error> {
        self.read_socket_u8(s, socket::SR).map(SocketStatus::from_u8)
    }

    pub fn interrupts(&self, s: u8) -> Result<SocketInterrupt, A::Error> {
        self.read_socket_u8(s, socket::IR).map(SocketInterrupt::from_bits)
    }

    /// Acknowledge interrupt flags (write one to clear)
    pub fn clear_interrupts(&self, s: u8, flags: SocketInterrupt) -> Result<(), A::Error> {
        self.write_socket_u8(s, socket::IR, flags.bits())
    }

    /// Issue a socket command and wait for the chip to accept it
    pub fn execute(&self, s: u8, command: Command) -> Result<(), SocketError<A::Error>> {
        self.write_socket_u8(s, socket::CR, command.as_u8())?;
        // CR reads back zero once the command has been taken
        let mut polls = 0;
        while self.read_socket_u8(s, socket::CR)? != 0 {
            polls += 1;
            if polls >= COMMAND_POLLS {
                error!("w5100: socket {} command {=u8:#x} not taken", s, command.as_u8());
                return Err(SocketError::Timeout);
            }
            K::delay(1);
        }
        trace!("w5100: socket {} command {=u8:#x}", s, command.as_u8());
        Ok(())
    }

    pub fn tx_window(&self, s: u8) -> Window {
        self.layout.tx(s)
    }

    pub fn rx_window(&self, s: u8) -> Window {
        self.layout.rx(s)
    }

    /// Copy `data` into the transmit buffer at logical position `ptr`
    pub fn write_tx(&self, s: u8, ptr: u16, data: &[u8]) -> Result<(), A::Error> {
        let (first, second) = self.tx_window(s).split(ptr, data.len());
        for span in core::iter::once(first).chain(second) {
            self.regs
                .write(span.addr, &data[span.offset..span.offset + span.len])?;
        }
        Ok(())
    }

    /// Copy from the receive buffer at logical position `ptr` into `buf`
    pub fn read_rx(&self, s: u8, ptr: u16, buf: &mut [u8]) -> Result<(), A::Error> {
        let (first, second) = self.rx_window(s).split(ptr, buf.len());
        for span in core::iter::once(first).chain(second) {
            self.regs
                .read(span.addr, &mut buf[span.offset..span.offset + span.len])?;
        }
        Ok(())
    }

    /// Take ownership of the lowest free socket
    pub(crate) fn claim(&self) -> Option<u8> {
        let sockets = self.layout.sockets();
        critical_section::with(|cs| {
            let claimed = self.claimed.borrow(cs);
            let mask = claimed.get();
            let s = (0..sockets).find(|s| mask & (1 << s) == 0)?;
            claimed.set(mask | (1 << s));
            Some(s)
        })
    }

    pub(crate) fn release(&self, s: u8) {
        critical_section::with(|cs| {
            let claimed = self.claimed.borrow(cs);
            claimed.set(claimed.get() & !(1 << s));
        });
    }

    /// Check whether a socket handle is owned
    pub fn is_claimed(&self, s: u8) -> bool {
        critical_section::with(|cs| self.claimed.borrow(cs).get() & (1 << s) != 0)
    }
}
