//! Berkeley-style sockets
//!
//! A [`Socket`] starts without a chip handle. `bind` claims one from the
//! chip's claim table and opens it; `close`/`disconnect` hand it back, as
//! does dropping the socket. At most one `Socket` holds a given handle.
//!
//! # Lifecycle
//!
//! ```text
//!            bind(Tcp)          listen            peer SYN
//!  (none) ───────────▶ Init ───────────▶ Listen ──────────▶ Established
//!     ▲                  │ connect                              │
//!     │                  ▼                                      │
//!     │               SynSent ─────────────────────────────────▶│
//!     │                                                         │ peer FIN
//!     │   close / disconnect                                    ▼
//!     └───────────────────────────────────────────────────── CloseWait
//!
//!            bind(Udp | IpRaw | MacRaw)
//!  (none) ──────────────────────────────▶ Udp | IpRaw | MacRaw
//! ```
//!
//! Receive results distinguish end of stream (`Ok(0)`) from "nothing yet"
//! (`Err(SocketError::WouldBlock)`).

use core::net::Ipv4Addr;

use hesper_hal::kernel::{Deadline, Kernel, Ticks, Timeout};
use hesper_net::header::{DatagramHeader, MAX_HEADER_LEN};
use hesper_net::is_valid_destination;
use hesper_net::regs::{socket, Command, Protocol, SocketFlags, SocketInterrupt};
use hesper_net::status::{Liveness, SocketStatus};

use super::chip::W5100;
use super::RegisterAccess;

/// Socket errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketError<E> {
    /// Register access failed
    Bus(E),
    /// Bad protocol, address or port; nothing was sent to the chip
    InvalidArgument,
    /// The socket has no chip handle
    NotBound,
    /// The operation is not valid in the socket's current status
    InvalidState,
    /// Every chip socket is claimed
    NoFreeSocket,
    /// The port table is full
    NoFreePort,
    /// No data yet; try again
    WouldBlock,
    /// The deadline passed, or the chip reported a transport timeout
    Timeout,
    /// The connection is gone
    Closed,
}

impl<E> From<E> for SocketError<E> {
    fn from(e: E) -> Self {
        SocketError::Bus(e)
    }
}

/// One chip socket
pub struct Socket<'c, A: RegisterAccess, K: Kernel> {
    chip: &'c W5100<A, K>,
    handle: Option<u8>,
    protocol: Protocol,
    local_port: u16,
}

impl<'c, A, K> Socket<'c, A, K>
where
    A: RegisterAccess,
    K: Kernel,
{
    /// Create an unbound socket
    pub fn new(chip: &'c W5100<A, K>) -> Self {
        Self {
            chip,
            handle: None,
            protocol: Protocol::Closed,
            local_port: 0,
        }
    }

    /// Chip socket number, if bound
    pub fn handle(&self) -> Option<u8> {
        self.handle
    }

    /// Protocol of the last `bind`
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Local port, if bound
    pub fn local_port(&self) -> Option<u16> {
        self.handle.map(|_| self.local_port)
    }

    fn bound(&self) -> Result<u8, SocketError<A::Error>> {
        self.handle.ok_or(SocketError::NotBound)
    }

    /// Open the socket for `protocol` on `port` (0 picks an ephemeral port)
    ///
    /// Returns the local port. A socket that is still open is closed first.
    pub fn bind(
        &mut self,
        protocol: Protocol,
        port: u16,
        flags: SocketFlags,
    ) -> Result<u16, SocketError<A::Error>> {
        if matches!(protocol, Protocol::Closed | Protocol::Pppoe) {
            return Err(SocketError::InvalidArgument);
        }

        let s = match self.handle {
            Some(s) => {
                self.chip.ports().release(self.local_port);
                self.local_port = 0;
                s
            }
            None => {
                let s = self.chip.claim().ok_or(SocketError::NoFreeSocket)?;
                self.handle = Some(s);
                s
            }
        };
        // A previous owner may have left it mid-shutdown
        if self.chip.status(s)? != SocketStatus::Closed {
            debug!("socket {}: not closed, closing first", s);
            self.shut(s, Command::Close)?;
        }

        let port = if port == 0 {
            self.chip.ports().allocate().ok_or(SocketError::NoFreePort)?
        } else if self.chip.ports().reserve(port) {
            port
        } else {
            return Err(SocketError::NoFreePort);
        };
        self.local_port = port;
        self.protocol = protocol;

        self.chip
            .write_socket_u8(s, socket::MR, protocol.as_u8() | flags.bits())?;
        self.chip.write_socket_u16(s, socket::PORT, port)?;
        self.chip.execute(s, Command::Open)?;

        let status = self.chip.status(s)?;
        if status == SocketStatus::Closed {
            warn!("socket {}: open failed", s);
            self.close()?;
            return Err(SocketError::InvalidState);
        }
        debug!("socket {}: bound port {} status {=u8:#x}", s, port, status.as_u8());
        Ok(port)
    }

    /// Wait for incoming connections
    pub fn listen(&mut self) -> Result<(), SocketError<A::Error>> {
        let s = self.bound()?;
        if self.chip.status(s)? != SocketStatus::Init {
            return Err(SocketError::InvalidState);
        }
        self.chip.execute(s, Command::Listen)?;
        debug!("socket {}: listening", s);
        Ok(())
    }

    /// Wait until a peer has connected to a listening socket
    ///
    /// Polls every `poll_interval` ticks. `Timeout::Immediate` checks once.
    pub fn accept(
        &mut self,
        timeout: Timeout,
        poll_interval: Ticks,
    ) -> Result<(), SocketError<A::Error>> {
        let s = self.bound()?;
        self.await_connection(s, timeout, poll_interval)
    }

    /// Start connecting to `addr:port`
    ///
    /// Returns once the command is issued; see [`wait_established`].
    ///
    /// [`wait_established`]: Self::wait_established
    pub fn connect(&mut self, addr: Ipv4Addr, port: u16) -> Result<(), SocketError<A::Error>> {
        if !is_valid_destination(addr, port) {
            return Err(SocketError::InvalidArgument);
        }
        let s = self.bound()?;
        if self.chip.status(s)? != SocketStatus::Init {
            return Err(SocketError::InvalidState);
        }
        self.chip.write_socket(s, socket::DIPR, &addr.octets())?;
        self.chip.write_socket_u16(s, socket::DPORT, port)?;
        self.chip.execute(s, Command::Connect)?;
        debug!("socket {}: connecting to port {}", s, port);
        Ok(())
    }

    /// Wait until an outgoing connection is up
    pub fn wait_established(
        &mut self,
        timeout: Timeout,
        poll_interval: Ticks,
    ) -> Result<(), SocketError<A::Error>> {
        let s = self.bound()?;
        self.await_connection(s, timeout, poll_interval)
    }

    fn await_connection(
        &self,
        s: u8,
        timeout: Timeout,
        poll_interval: Ticks,
    ) -> Result<(), SocketError<A::Error>> {
        let deadline = timeout.start::<K>();
        loop {
            let status = self.chip.status(s)?;
            if status.is_connected() {
                debug!("socket {}: connected", s);
                return Ok(());
            }
            match status.liveness() {
                Liveness::Dead => {
                    warn!("socket {}: connection failed", s);
                    return Err(SocketError::Closed);
                }
                Liveness::Indeterminate => {
                    warn!("socket {}: indeterminate status {=u8:#x}", s, status.as_u8());
                }
                Liveness::Alive => {}
            }
            if deadline.expired::<K>() {
                return Err(SocketError::Timeout);
            }
            K::delay(poll_interval);
        }
    }

    /// Send on a connected stream socket
    ///
    /// At most one buffer's worth is taken; returns the number of bytes
    /// sent. `timeout` bounds the wait for buffer space. Once the bytes are
    /// handed to the chip the call waits for its verdict, which ends in
    /// SEND_OK or a closed socket.
    pub fn send(&mut self, data: &[u8], timeout: Timeout) -> Result<usize, SocketError<A::Error>> {
        let s = self.bound()?;
        if !self.chip.status(s)?.is_connected() {
            return Err(SocketError::InvalidState);
        }
        let deadline = timeout.start::<K>();
        let len = self.reserve_tx(s, data.len(), deadline, SocketStatus::is_connected)?;
        if len == 0 {
            return Ok(0);
        }
        self.transmit(s, &data[..len], false)?;
        Ok(len)
    }

    /// Send one datagram to `addr:port`
    ///
    /// `timeout` bounds the wait for buffer space. A failed ARP lookup is
    /// reported by the chip and returned as `Timeout`.
    pub fn sendto(
        &mut self,
        data: &[u8],
        addr: Ipv4Addr,
        port: u16,
        timeout: Timeout,
    ) -> Result<usize, SocketError<A::Error>> {
        if !is_valid_destination(addr, port) {
            return Err(SocketError::InvalidArgument);
        }
        let s = self.bound()?;
        if !self.chip.status(s)?.is_datagram() {
            return Err(SocketError::InvalidState);
        }
        let deadline = timeout.start::<K>();
        let len = self.reserve_tx(s, data.len(), deadline, SocketStatus::is_datagram)?;

        self.chip.write_socket(s, socket::DIPR, &addr.octets())?;
        self.chip.write_socket_u16(s, socket::DPORT, port)?;
        self.transmit(s, &data[..len], true)?;
        Ok(len)
    }

    /// Wait for room for `wanted` bytes (capped at the buffer size)
    fn reserve_tx(
        &mut self,
        s: u8,
        wanted: usize,
        deadline: Deadline,
        usable: fn(SocketStatus) -> bool,
    ) -> Result<usize, SocketError<A::Error>> {
        let len = wanted.min(self.chip.tx_window(s).size() as usize);
        loop {
            if self.chip.tx_free(s)? as usize >= len {
                return Ok(len);
            }
            let status = self.chip.status(s)?;
            if !usable(status) {
                warn!("socket {}: closed while waiting for buffer space", s);
                return Err(SocketError::Closed);
            }
            if deadline.expired::<K>() {
                warn!("socket {}: no buffer space", s);
                return Err(SocketError::Timeout);
            }
            K::delay(1);
        }
    }

    /// Copy into the transmit buffer, issue SEND and wait for SEND_OK
    ///
    /// After SEND the bytes belong to the chip, so there is no deadline
    /// here: the chip always answers with SEND_OK, TIMEOUT (datagrams) or
    /// a closed socket.
    fn transmit(
        &mut self,
        s: u8,
        data: &[u8],
        datagram: bool,
    ) -> Result<(), SocketError<A::Error>> {
        // An acknowledgement left pending must not answer this command
        self.chip.clear_interrupts(s, SocketInterrupt::SEND_OK)?;

        let ptr = self.chip.read_socket_u16(s, socket::TX_WR)?;
        self.chip.write_tx(s, ptr, data)?;
        self.chip
            .write_socket_u16(s, socket::TX_WR, ptr.wrapping_add(data.len() as u16))?;
        self.chip.execute(s, Command::Send)?;

        loop {
            let flags = self.chip.interrupts(s)?;
            if flags.contains(SocketInterrupt::SEND_OK) {
                self.chip.clear_interrupts(s, SocketInterrupt::SEND_OK)?;
                return Ok(());
            }
            if datagram && flags.contains(SocketInterrupt::TIMEOUT) {
                self.chip
                    .clear_interrupts(s, SocketInterrupt::SEND_OK | SocketInterrupt::TIMEOUT)?;
                warn!("socket {}: datagram send timed out", s);
                return Err(SocketError::Timeout);
            }
            if self.chip.status(s)? == SocketStatus::Closed {
                warn!("socket {}: closed during send", s);
                self.close()?;
                return Err(SocketError::Closed);
            }
            K::delay(1);
        }
    }

    /// Classify an empty receive buffer
    fn empty_result(&self, s: u8) -> Result<usize, SocketError<A::Error>> {
        if self.chip.status(s)?.is_end_of_stream() {
            Ok(0)
        } else {
            Err(SocketError::WouldBlock)
        }
    }

    /// Receive stream data
    ///
    /// `Ok(0)` is end of stream; `Err(WouldBlock)` means no data yet. An
    /// empty `buf` is `Err(InvalidArgument)`.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SocketError<A::Error>> {
        let s = self.bound()?;
        if buf.is_empty() {
            return Err(SocketError::InvalidArgument);
        }
        let available = self.chip.rx_received(s)? as usize;
        if available == 0 {
            return self.empty_result(s);
        }
        let len = available.min(buf.len());
        let ptr = self.chip.read_socket_u16(s, socket::RX_RD)?;
        self.chip.read_rx(s, ptr, &mut buf[..len])?;
        self.chip
            .write_socket_u16(s, socket::RX_RD, ptr.wrapping_add(len as u16))?;
        self.chip.execute(s, Command::Recv)?;
        Ok(len)
    }

    /// Copy waiting data without consuming it
    pub fn peek(&self, buf: &mut [u8]) -> Result<usize, SocketError<A::Error>> {
        let s = self.bound()?;
        if buf.is_empty() {
            return Err(SocketError::InvalidArgument);
        }
        let available = self.chip.rx_received(s)? as usize;
        if available == 0 {
            return self.empty_result(s);
        }
        let len = available.min(buf.len());
        let ptr = self.chip.read_socket_u16(s, socket::RX_RD)?;
        self.chip.read_rx(s, ptr, &mut buf[..len])?;
        Ok(len)
    }

    /// Receive one datagram
    ///
    /// Returns the number of payload bytes copied and the sender. The part
    /// of a datagram that does not fit in `buf` is discarded.
    pub fn recvfrom(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(usize, DatagramHeader), SocketError<A::Error>> {
        let s = self.bound()?;
        let header_len =
            DatagramHeader::size(self.protocol).ok_or(SocketError::InvalidState)?;

        let available = self.chip.rx_received(s)? as usize;
        if available < header_len {
            return if self.chip.status(s)?.is_datagram() {
                Err(SocketError::WouldBlock)
            } else {
                Err(SocketError::Closed)
            };
        }

        let mut raw = [0u8; MAX_HEADER_LEN];
        let mut ptr = self.chip.read_socket_u16(s, socket::RX_RD)?;
        self.chip.read_rx(s, ptr, &mut raw[..header_len])?;
        let header = DatagramHeader::parse(self.protocol, &raw[..header_len])
            .ok_or(SocketError::InvalidState)?;
        ptr = ptr.wrapping_add(header_len as u16);

        let payload = (header.len as usize).min(available - header_len);
        let len = payload.min(buf.len());
        self.chip.read_rx(s, ptr, &mut buf[..len])?;
        if len < payload {
            debug!("socket {}: truncated datagram, {} bytes dropped", s, payload - len);
        }
        ptr = ptr.wrapping_add(payload as u16);

        self.chip.write_socket_u16(s, socket::RX_RD, ptr)?;
        self.chip.execute(s, Command::Recv)?;
        Ok((len, header))
    }

    /// Bytes waiting to be received
    pub fn available(&self) -> Result<usize, SocketError<A::Error>> {
        let s = self.bound()?;
        Ok(self.chip.rx_received(s)? as usize)
    }

    /// Room in the transmit buffer
    pub fn free(&self) -> Result<usize, SocketError<A::Error>> {
        let s = self.bound()?;
        Ok(self.chip.tx_free(s)? as usize)
    }

    /// Chip status; an unbound socket is `Closed`
    pub fn status(&self) -> Result<SocketStatus, SocketError<A::Error>> {
        match self.handle {
            Some(s) => Ok(self.chip.status(s)?),
            None => Ok(SocketStatus::Closed),
        }
    }

    /// Destination address and port registers
    pub fn remote(&self) -> Result<(Ipv4Addr, u16), SocketError<A::Error>> {
        let s = self.bound()?;
        let mut octets = [0u8; 4];
        self.chip.read_socket(s, socket::DIPR, &mut octets)?;
        let port = self.chip.read_socket_u16(s, socket::DPORT)?;
        Ok((Ipv4Addr::from(octets), port))
    }

    pub fn is_connected(&self) -> Result<bool, SocketError<A::Error>> {
        Ok(self.status()?.is_connected())
    }

    pub fn is_closed(&self) -> Result<bool, SocketError<A::Error>> {
        Ok(self.status()? == SocketStatus::Closed)
    }

    pub fn is_listening(&self) -> Result<bool, SocketError<A::Error>> {
        Ok(self.status()? == SocketStatus::Listen)
    }

    /// Issue `command` and acknowledge every pending flag
    fn shut(&self, s: u8, command: Command) -> Result<(), SocketError<A::Error>> {
        self.chip.execute(s, command)?;
        self.chip.clear_interrupts(s, SocketInterrupt::ALL)?;
        Ok(())
    }

    /// Hand the handle and port back, whatever the chip said
    fn teardown(&mut self, s: u8, command: Command) -> Result<(), SocketError<A::Error>> {
        let result = self.shut(s, command);
        self.chip.ports().release(self.local_port);
        self.chip.release(s);
        self.handle = None;
        self.local_port = 0;
        debug!("socket {}: released", s);
        result
    }

    /// Close immediately
    pub fn close(&mut self) -> Result<(), SocketError<A::Error>> {
        match self.handle {
            Some(s) => self.teardown(s, Command::Close),
            None => Ok(()),
        }
    }

    /// Start a graceful TCP shutdown and release the socket
    pub fn disconnect(&mut self) -> Result<(), SocketError<A::Error>> {
        let s = self.bound()?;
        self.teardown(s, Command::Discon)
    }
}

impl<A, K> Drop for Socket<'_, A, K>
where
    A: RegisterAccess,
    K: Kernel,
{
    fn drop(&mut self) {
        if self.close().is_err() {
            warn!("socket: close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, sim_chip, MockKernel, SimW5100};
    use core::cell::Cell;
    use hesper_net::ports::EPHEMERAL_START;
    use proptest::prelude::*;
    use std::vec::Vec;

    const PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
    const REGION: usize = 0x0800;

    fn tcp(chip: &SimW5100) -> Socket<'_, crate::testing::SimChip, MockKernel> {
        let mut sock = Socket::new(chip);
        sock.bind(Protocol::Tcp, 0, SocketFlags::NONE).unwrap();
        sock
    }

    fn established(chip: &SimW5100) -> Socket<'_, crate::testing::SimChip, MockKernel> {
        let sock = tcp(chip);
        chip.registers().set_status(0, SocketStatus::Established);
        sock
    }

    fn udp(chip: &SimW5100) -> Socket<'_, crate::testing::SimChip, MockKernel> {
        let mut sock = Socket::new(chip);
        sock.bind(Protocol::Udp, 0, SocketFlags::NONE).unwrap();
        sock
    }

    /// Run `action` on the sim after `delays` sleeps of the calling task
    fn after_delays(delays: u32, action: impl Fn() + 'static) {
        let count: &'static Cell<u32> = testing::leak(Cell::new(0));
        testing::on_delay(move || {
            count.set(count.get() + 1);
            if count.get() == delays {
                action();
            }
        });
    }

    #[test]
    fn test_bind_ephemeral_then_close() {
        let chip = sim_chip();
        let mut sock = Socket::new(chip);
        let port = sock.bind(Protocol::Tcp, 0, SocketFlags::NONE).unwrap();

        assert!(port >= EPHEMERAL_START);
        assert_eq!(sock.handle(), Some(0));
        assert_eq!(sock.local_port(), Some(port));
        assert_eq!(sock.status(), Ok(SocketStatus::Init));
        assert!(chip.ports().is_bound(port));
        assert!(chip.is_claimed(0));

        sock.close().unwrap();
        assert_eq!(sock.handle(), None);
        assert_eq!(sock.status(), Ok(SocketStatus::Closed));
        assert_eq!(chip.registers().status(0), SocketStatus::Closed);
        assert!(!chip.ports().is_bound(port));
        assert!(!chip.is_claimed(0));
    }

    #[test]
    fn test_bind_datagram_modes() {
        let chip = sim_chip();
        let sock = udp(chip);
        assert_eq!(sock.status(), Ok(SocketStatus::Udp));

        let mut raw = Socket::new(chip);
        raw.bind(Protocol::IpRaw, 0, SocketFlags::NONE).unwrap();
        assert_eq!(raw.status(), Ok(SocketStatus::IpRaw));
    }

    #[test]
    fn test_bind_writes_mode_flags() {
        let chip = sim_chip();
        let mut sock = Socket::new(chip);
        sock.bind(Protocol::Tcp, 5000, SocketFlags::NO_DELAYED_ACK).unwrap();
        assert_eq!(chip.registers().peek(0x0400), 0x21);
        assert_eq!(sock.local_port(), Some(5000));
        assert_eq!(chip.registers().peek(0x0404), 0x13);
        assert_eq!(chip.registers().peek(0x0405), 0x88);
    }

    #[test]
    fn test_bind_rejects_bad_protocol_without_access() {
        let chip = sim_chip();
        let before = chip.registers().accesses();
        let mut sock = Socket::new(chip);
        assert_eq!(
            sock.bind(Protocol::Closed, 0, SocketFlags::NONE),
            Err(SocketError::InvalidArgument)
        );
        assert_eq!(chip.registers().accesses(), before);
        assert_eq!(sock.handle(), None);
    }

    #[test]
    fn test_unbound_operations() {
        let chip = sim_chip();
        let mut sock = Socket::new(chip);
        let mut buf = [0u8; 4];
        assert_eq!(sock.listen(), Err(SocketError::NotBound));
        assert_eq!(sock.recv(&mut buf), Err(SocketError::NotBound));
        assert_eq!(sock.send(b"x", Timeout::Immediate), Err(SocketError::NotBound));
        assert_eq!(sock.available(), Err(SocketError::NotBound));
        assert_eq!(sock.disconnect(), Err(SocketError::NotBound));
        assert_eq!(sock.status(), Ok(SocketStatus::Closed));
        assert_eq!(sock.close(), Ok(()));
    }

    #[test]
    fn test_all_handles_claimed() {
        let chip = sim_chip();
        let socks: Vec<_> = (0..4).map(|_| tcp(chip)).collect();
        let handles: Vec<_> = socks.iter().map(|s| s.handle()).collect();
        assert_eq!(handles, [Some(0), Some(1), Some(2), Some(3)]);

        let mut fifth = Socket::new(chip);
        assert_eq!(
            fifth.bind(Protocol::Tcp, 0, SocketFlags::NONE),
            Err(SocketError::NoFreeSocket)
        );
    }

    #[test]
    fn test_shared_server_port() {
        let chip = sim_chip();
        let mut a = Socket::new(chip);
        let mut b = Socket::new(chip);
        assert_eq!(a.bind(Protocol::Tcp, 80, SocketFlags::NONE), Ok(80));
        assert_eq!(b.bind(Protocol::Tcp, 80, SocketFlags::NONE), Ok(80));
        a.close().unwrap();
        assert!(chip.ports().is_bound(80));
        b.close().unwrap();
        assert!(!chip.ports().is_bound(80));
    }

    #[test]
    fn test_rebind_closes_and_reopens() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        let first = sock.local_port().unwrap();
        sock.listen().unwrap();

        let second = sock.bind(Protocol::Udp, 0, SocketFlags::NONE).unwrap();
        assert_eq!(sock.handle(), Some(0));
        assert_eq!(sock.status(), Ok(SocketStatus::Udp));
        assert!(!chip.ports().is_bound(first));
        assert!(chip.ports().is_bound(second));
    }

    #[test]
    fn test_listen_requires_init() {
        let chip = sim_chip();
        let mut sock = udp(chip);
        assert_eq!(sock.listen(), Err(SocketError::InvalidState));

        let mut stream = tcp(chip);
        stream.listen().unwrap();
        assert_eq!(stream.is_listening(), Ok(true));
        assert_eq!(stream.listen(), Err(SocketError::InvalidState));
    }

    #[test]
    fn test_accept_within_timeout() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        sock.listen().unwrap();

        after_delays(3, move || chip.registers().set_status(0, SocketStatus::Established));
        let start = MockKernel::now();
        assert_eq!(sock.accept(Timeout::Ticks(10), 1), Ok(()));
        testing::clear_hook();

        assert!(MockKernel::now().wrapping_sub(start) < 10);
        assert_eq!(sock.is_connected(), Ok(true));
    }

    #[test]
    fn test_accept_times_out() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        sock.listen().unwrap();
        assert_eq!(sock.accept(Timeout::Ticks(5), 1), Err(SocketError::Timeout));
        // Still listening: a later accept can succeed
        chip.registers().set_status(0, SocketStatus::Established);
        assert_eq!(sock.accept(Timeout::Immediate, 1), Ok(()));
    }

    #[test]
    fn test_accept_immediate_checks_once() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        sock.listen().unwrap();
        let start = MockKernel::now();
        assert_eq!(sock.accept(Timeout::Immediate, 1), Err(SocketError::Timeout));
        assert_eq!(MockKernel::now(), start);
    }

    #[test]
    fn test_accept_fails_on_dead_status() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        sock.listen().unwrap();
        chip.registers().set_status(0, SocketStatus::TimeWait);
        assert_eq!(sock.accept(Timeout::Forever, 1), Err(SocketError::Closed));
    }

    #[test]
    fn test_accept_keeps_polling_through_arp() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        chip.registers().set_status(0, SocketStatus::Arp(0x11));
        after_delays(4, move || chip.registers().set_status(0, SocketStatus::Established));
        assert_eq!(sock.accept(Timeout::Forever, 2), Ok(()));
        testing::clear_hook();
    }

    #[test]
    fn test_connect_validation_has_no_side_effect() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        let before = chip.registers().accesses();
        assert_eq!(sock.connect(Ipv4Addr::BROADCAST, 80), Err(SocketError::InvalidArgument));
        assert_eq!(sock.connect(Ipv4Addr::UNSPECIFIED, 80), Err(SocketError::InvalidArgument));
        assert_eq!(sock.connect(PEER, 0), Err(SocketError::InvalidArgument));
        assert_eq!(chip.registers().accesses(), before);
    }

    #[test]
    fn test_connect_and_wait_established() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        sock.connect(PEER, 8080).unwrap();
        assert_eq!(sock.status(), Ok(SocketStatus::SynSent));
        assert_eq!(sock.remote(), Ok((PEER, 8080)));

        assert_eq!(sock.wait_established(Timeout::Ticks(3), 1), Err(SocketError::Timeout));
        after_delays(2, move || chip.registers().set_status(0, SocketStatus::Established));
        assert_eq!(sock.wait_established(Timeout::Ticks(10), 1), Ok(()));
        testing::clear_hook();

        // Only from INIT
        assert_eq!(sock.connect(PEER, 8080), Err(SocketError::InvalidState));
    }

    #[test]
    fn test_connect_refused() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        sock.connect(PEER, 8080).unwrap();
        chip.registers().set_status(0, SocketStatus::Closed);
        assert_eq!(sock.wait_established(Timeout::Forever, 1), Err(SocketError::Closed));
    }

    #[test]
    fn test_send_stream() {
        let chip = sim_chip();
        let mut sock = established(chip);
        assert_eq!(sock.send(b"hello", Timeout::Ticks(10)), Ok(5));
        assert_eq!(chip.registers().sent(0), b"hello");
        assert_eq!(chip.interrupts(0), Ok(SocketInterrupt::NONE));
        assert_eq!(sock.free(), Ok(REGION));
    }

    #[test]
    fn test_send_caps_at_region_size() {
        let chip = sim_chip();
        let mut sock = established(chip);
        let data: Vec<u8> = (0..REGION + 100).map(|i| i as u8).collect();
        assert_eq!(sock.send(&data, Timeout::Ticks(10)), Ok(REGION));
        assert_eq!(chip.registers().sent(0), &data[..REGION]);
    }

    #[test]
    fn test_send_requires_connection() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        assert_eq!(sock.send(b"x", Timeout::Immediate), Err(SocketError::InvalidState));
    }

    #[test]
    fn test_send_waits_for_buffer_space() {
        let chip = sim_chip();
        let mut sock = established(chip);
        chip.registers().lag_acks(true);
        assert_eq!(sock.send(&[1; 600], Timeout::Ticks(3)), Ok(600));
        assert_eq!(sock.free(), Ok(REGION - 600));

        // No room and no acknowledgement: nothing is committed
        let before = chip.registers().sent(0).len();
        assert_eq!(sock.send(&[9; REGION], Timeout::Ticks(3)), Err(SocketError::Timeout));
        assert_eq!(chip.registers().sent(0).len(), before);
        assert_eq!(sock.free(), Ok(REGION - 600));

        // The full buffer fits once the peer acknowledges the first send
        after_delays(2, move || chip.registers().acknowledge(0));
        assert_eq!(sock.send(&[2; REGION], Timeout::Ticks(20)), Ok(REGION));
        testing::clear_hook();

        let sent = chip.registers().sent(0);
        assert_eq!(sent.len(), 600 + REGION);
        assert!(sent[..600].iter().all(|&b| b == 1));
        assert!(sent[600..].iter().all(|&b| b == 2));
    }

    #[test]
    fn test_send_waits_for_acknowledgement_past_deadline() {
        let chip = sim_chip();
        let mut sock = established(chip);
        chip.registers().stall_sends(true);

        after_delays(5, move || chip.registers().complete_send(0));
        assert_eq!(sock.send(b"aaa", Timeout::Ticks(2)), Ok(3));
        assert_eq!(chip.registers().sent(0), b"aaa");
        assert_eq!(chip.interrupts(0), Ok(SocketInterrupt::NONE));

        // The next send is answered by its own SEND_OK
        after_delays(3, move || chip.registers().complete_send(0));
        assert_eq!(sock.send(b"bbb", Timeout::Ticks(2)), Ok(3));
        testing::clear_hook();
        assert_eq!(chip.registers().sent(0), b"aaabbb");
    }

    #[test]
    fn test_send_ignores_pending_acknowledgement() {
        let chip = sim_chip();
        let mut sock = established(chip);
        chip.registers().stall_sends(true);
        chip.registers().raise(0, SocketInterrupt::SEND_OK);

        after_delays(2, move || chip.registers().complete_send(0));
        assert_eq!(sock.send(b"late", Timeout::Ticks(10)), Ok(4));
        testing::clear_hook();
        assert_eq!(chip.registers().sent(0), b"late");
    }

    #[test]
    fn test_send_gives_up_when_connection_drops_while_waiting() {
        let chip = sim_chip();
        let mut sock = established(chip);
        chip.registers().lag_acks(true);
        assert_eq!(sock.send(&[0; 600], Timeout::Ticks(2)), Ok(600));

        after_delays(1, move || chip.registers().set_status(0, SocketStatus::Closed));
        assert_eq!(sock.send(&[0; REGION], Timeout::Forever), Err(SocketError::Closed));
        testing::clear_hook();
    }

    #[test]
    fn test_send_closed_while_awaiting_acknowledgement() {
        let chip = sim_chip();
        let mut sock = established(chip);
        chip.registers().stall_sends(true);

        after_delays(3, move || chip.registers().set_status(0, SocketStatus::Closed));
        assert_eq!(sock.send(b"gone", Timeout::Ticks(1)), Err(SocketError::Closed));
        testing::clear_hook();
        assert_eq!(sock.handle(), None);
    }

    #[test]
    fn test_send_closes_on_peer_reset() {
        let chip = sim_chip();
        let mut sock = established(chip);
        let port = sock.local_port().unwrap();
        chip.registers().close_on_send(true);

        assert_eq!(sock.send(b"data", Timeout::Ticks(5)), Err(SocketError::Closed));
        assert_eq!(sock.handle(), None);
        assert!(!chip.ports().is_bound(port));
        assert!(!chip.is_claimed(0));
    }

    #[test]
    fn test_recv_would_block_vs_eof() {
        let chip = sim_chip();
        let mut sock = established(chip);
        let mut buf = [0u8; 16];
        assert_eq!(sock.recv(&mut buf), Err(SocketError::WouldBlock));

        chip.registers().deliver(0, b"bye");
        chip.registers().set_status(0, SocketStatus::CloseWait);
        // Buffered data is still delivered after the peer's FIN
        assert_eq!(sock.recv(&mut buf), Ok(3));
        assert_eq!(&buf[..3], b"bye");
        assert_eq!(sock.recv(&mut buf), Ok(0));

        for status in [SocketStatus::Closed, SocketStatus::Listen, SocketStatus::LastAck] {
            chip.registers().set_status(0, status);
            assert_eq!(sock.recv(&mut buf), Ok(0));
        }

        chip.registers().set_status(0, SocketStatus::SynRecv);
        assert_eq!(sock.recv(&mut buf), Err(SocketError::WouldBlock));
    }

    #[test]
    fn test_recv_empty_buffer_is_not_end_of_stream() {
        let chip = sim_chip();
        let mut sock = established(chip);
        chip.registers().deliver(0, b"abc");

        let before = chip.registers().accesses();
        assert_eq!(sock.recv(&mut []), Err(SocketError::InvalidArgument));
        assert_eq!(sock.peek(&mut []), Err(SocketError::InvalidArgument));
        assert_eq!(chip.registers().accesses(), before);

        let mut buf = [0u8; 8];
        assert_eq!(sock.recv(&mut buf), Ok(3));
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_recv_partial_and_peek() {
        let chip = sim_chip();
        let mut sock = established(chip);
        chip.registers().deliver(0, b"0123456789");

        let mut buf = [0u8; 4];
        assert_eq!(sock.peek(&mut buf), Ok(4));
        assert_eq!(&buf, b"0123");
        assert_eq!(sock.available(), Ok(10));

        assert_eq!(sock.recv(&mut buf), Ok(4));
        assert_eq!(&buf, b"0123");
        assert_eq!(sock.available(), Ok(6));

        let mut rest = [0u8; 16];
        assert_eq!(sock.recv(&mut rest), Ok(6));
        assert_eq!(&rest[..6], b"456789");
    }

    #[test]
    fn test_recv_across_buffer_wrap() {
        let chip = sim_chip();
        let mut sock = established(chip);
        let mut sink = vec![0u8; REGION];
        chip.registers().deliver(0, &vec![0xAA; REGION - 5]);
        assert_eq!(sock.recv(&mut sink), Ok(REGION - 5));

        chip.registers().deliver(0, b"wrapped!");
        let mut buf = [0u8; 8];
        assert_eq!(sock.recv(&mut buf), Ok(8));
        assert_eq!(&buf, b"wrapped!");
    }

    #[test]
    fn test_sendto_rejects_bad_destination_without_access() {
        let chip = sim_chip();
        let mut sock = udp(chip);
        let before = chip.registers().accesses();
        assert_eq!(
            sock.sendto(b"x", Ipv4Addr::UNSPECIFIED, 0, Timeout::Immediate),
            Err(SocketError::InvalidArgument)
        );
        assert_eq!(
            sock.sendto(b"x", Ipv4Addr::BROADCAST, 53, Timeout::Immediate),
            Err(SocketError::InvalidArgument)
        );
        assert_eq!(chip.registers().accesses(), before);
    }

    #[test]
    fn test_sendto_datagram() {
        let chip = sim_chip();
        let mut sock = udp(chip);
        assert_eq!(sock.sendto(b"ping", PEER, 7, Timeout::Ticks(5)), Ok(4));
        assert_eq!(chip.registers().datagrams(), [(0, PEER, 7, b"ping".to_vec())]);
    }

    #[test]
    fn test_sendto_transport_timeout() {
        let chip = sim_chip();
        let mut sock = udp(chip);
        chip.registers().datagram_timeout(true);
        assert_eq!(sock.sendto(b"ping", PEER, 7, Timeout::Ticks(5)), Err(SocketError::Timeout));
        assert_eq!(chip.interrupts(0), Ok(SocketInterrupt::NONE));
        // Not closed: the socket is still usable
        assert_eq!(sock.status(), Ok(SocketStatus::Udp));
    }

    #[test]
    fn test_sendto_requires_datagram_socket() {
        let chip = sim_chip();
        let mut sock = tcp(chip);
        assert_eq!(
            sock.sendto(b"x", PEER, 7, Timeout::Immediate),
            Err(SocketError::InvalidState)
        );
    }

    #[test]
    fn test_recvfrom_decodes_and_truncates() {
        let chip = sim_chip();
        let mut sock = udp(chip);
        let mut buf = [0u8; 32];
        assert_eq!(sock.recvfrom(&mut buf), Err(SocketError::WouldBlock));

        chip.registers().deliver_udp(0, PEER, 5353, b"first");
        chip.registers().deliver_udp(0, PEER, 5354, b"second datagram");
        chip.registers().deliver_udp(0, PEER, 5355, b"third");

        let (n, header) = sock.recvfrom(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first");
        assert_eq!((header.addr, header.port, header.len), (PEER, 5353, 5));

        let mut small = [0u8; 6];
        let (n, header) = sock.recvfrom(&mut small).unwrap();
        assert_eq!(&small[..n], b"second");
        assert_eq!(header.len, 15);

        // The dropped tail does not leak into the next datagram
        let (n, header) = sock.recvfrom(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"third");
        assert_eq!(header.port, 5355);
        assert_eq!(sock.available(), Ok(0));
    }

    #[test]
    fn test_recvfrom_requires_datagram_protocol() {
        let chip = sim_chip();
        let mut sock = established(chip);
        let mut buf = [0u8; 8];
        assert_eq!(sock.recvfrom(&mut buf), Err(SocketError::InvalidState));
    }

    #[test]
    fn test_disconnect_releases_and_next_bind_force_closes() {
        let chip = sim_chip();
        let mut sock = established(chip);
        sock.disconnect().unwrap();
        assert_eq!(sock.handle(), None);
        assert_eq!(chip.registers().status(0), SocketStatus::FinWait);

        let next = tcp(chip);
        assert_eq!(next.handle(), Some(0));
        assert_eq!(next.status(), Ok(SocketStatus::Init));
    }

    #[test]
    fn test_drop_closes_socket() {
        let chip = sim_chip();
        let port = {
            let sock = established(chip);
            sock.local_port().unwrap()
        };
        assert!(!chip.is_claimed(0));
        assert!(!chip.ports().is_bound(port));
        assert_eq!(chip.registers().status(0), SocketStatus::Closed);
    }

    #[test]
    fn test_predicates() {
        let chip = sim_chip();
        let sock = tcp(chip);
        assert_eq!(sock.is_closed(), Ok(false));
        assert_eq!(sock.is_connected(), Ok(false));
        chip.registers().set_status(0, SocketStatus::CloseWait);
        assert_eq!(sock.is_connected(), Ok(true));
        assert_eq!(sock.protocol(), Protocol::Tcp);
    }

    proptest! {
        #[test]
        fn prop_stream_survives_any_chunking(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..300), 1..20),
            read_size in 1usize..200,
        ) {
            let chip = sim_chip();
            let mut sock = established(chip);
            let mut expected = Vec::new();
            let mut received = Vec::new();
            let mut buf = vec![0u8; read_size];

            for chunk in &chunks {
                chip.registers().deliver(0, chunk);
                expected.extend_from_slice(chunk);
                loop {
                    match sock.recv(&mut buf) {
                        Ok(n) => received.extend_from_slice(&buf[..n]),
                        Err(SocketError::WouldBlock) => break,
                        Err(e) => panic!("unexpected {e:?}"),
                    }
                }
            }
            prop_assert_eq!(received, expected);
        }
    }
}
