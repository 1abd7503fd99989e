//! Host-side test support shared by the driver tests

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use core::net::Ipv4Addr;
use std::boxed::Box;
use std::vec::Vec;

use critical_section::Mutex;
use hesper_hal::kernel::{Kernel, Ticks};
use hesper_net::ports::PortAllocator;
use hesper_net::regs::{
    common, mode, socket, socket_reg, Protocol, SocketInterrupt, MAX_SOCKETS, SOCKET_BASE,
    SOCKET_STRIDE,
};
use hesper_net::status::SocketStatus;

use crate::w5100::{RegisterAccess, W5100};

std::thread_local! {
    static TICKS: Cell<Ticks> = const { Cell::new(0) };
    static YIELDS: Cell<u32> = const { Cell::new(0) };
    static ON_DELAY: RefCell<Option<Box<dyn FnMut()>>> = const { RefCell::new(None) };
}

/// Scheduler stand-in with a thread-local tick counter
///
/// `delay` advances the clock and runs the hook installed with
/// [`on_delay`], which tests use to fire interrupts or change chip state
/// while a task is waiting.
pub struct MockKernel;

impl Kernel for MockKernel {
    const TICK_HZ: u32 = 1000;

    fn now() -> Ticks {
        TICKS.with(|t| t.get())
    }

    fn delay(ticks: Ticks) {
        TICKS.with(|t| t.set(t.get().wrapping_add(ticks.max(1))));
        let hook = ON_DELAY.with(|h| h.borrow_mut().take());
        if let Some(mut hook) = hook {
            hook();
            ON_DELAY.with(|h| {
                let mut slot = h.borrow_mut();
                if slot.is_none() {
                    *slot = Some(hook);
                }
            });
        }
    }

    fn yield_from_isr() {
        YIELDS.with(|y| y.set(y.get() + 1));
    }
}

pub fn on_delay(hook: impl FnMut() + 'static) {
    ON_DELAY.with(|h| *h.borrow_mut() = Some(Box::new(hook)));
}

pub fn clear_hook() {
    ON_DELAY.with(|h| *h.borrow_mut() = None);
}

pub fn yields() -> u32 {
    YIELDS.with(|y| y.get())
}

pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// Register-level W5100 model
///
/// Holds the full 32 KiB address space and applies the chip's command
/// semantics on writes to a socket's command register. Transmitted data is
/// captured instead of going on the wire; received data is injected with
/// [`deliver`](SimChip::deliver).
pub struct SimChip {
    state: Mutex<RefCell<SimState>>,
}

struct SimState {
    mem: Vec<u8>,
    accesses: usize,
    rx_write: [u16; MAX_SOCKETS as usize],
    sent: [Vec<u8>; MAX_SOCKETS as usize],
    datagrams: Vec<(u8, Ipv4Addr, u16, Vec<u8>)>,
    stick_reset: bool,
    jitter: u8,
    stall_sends: bool,
    stick_commands: bool,
    lag_acks: bool,
    /// Stream bytes on the wire that the peer has not acknowledged yet
    unacked: [u16; MAX_SOCKETS as usize],
    datagram_timeout: bool,
    close_on_send: bool,
}

const SIM_SOCKET_SIZE: u16 = 0x0800;

impl SimState {
    fn get16(&self, s: u8, offset: u16) -> u16 {
        let a = socket_reg(s, offset) as usize;
        u16::from_be_bytes([self.mem[a], self.mem[a + 1]])
    }

    fn set16(&mut self, s: u8, offset: u16, value: u16) {
        let a = socket_reg(s, offset) as usize;
        self.mem[a..a + 2].copy_from_slice(&value.to_be_bytes());
    }

    fn get8(&self, s: u8, offset: u16) -> u8 {
        self.mem[socket_reg(s, offset) as usize]
    }

    fn set8(&mut self, s: u8, offset: u16, value: u8) {
        self.mem[socket_reg(s, offset) as usize] = value;
    }

    fn refresh(&mut self, s: u8) {
        let used = self.get16(s, socket::TX_WR).wrapping_sub(self.get16(s, socket::TX_RD));
        let held = used.wrapping_add(self.unacked[s as usize]);
        self.set16(s, socket::TX_FSR, SIM_SOCKET_SIZE.wrapping_sub(held));
        let pending = self.rx_write[s as usize].wrapping_sub(self.get16(s, socket::RX_RD));
        self.set16(s, socket::RX_RSR, pending);
    }

    fn reset(&mut self) {
        self.mem[..0x0800].fill(0);
        self.rx_write = [0; MAX_SOCKETS as usize];
        self.unacked = [0; MAX_SOCKETS as usize];
        for s in 0..MAX_SOCKETS {
            self.refresh(s);
        }
    }

    fn command(&mut self, s: u8, cmd: u8) {
        let status = SocketStatus::from_u8(self.get8(s, socket::SR));
        let next = match cmd {
            0x01 => match Protocol::from_u8(self.get8(s, socket::MR)) {
                Some(Protocol::Tcp) => SocketStatus::Init,
                Some(Protocol::Udp) => SocketStatus::Udp,
                Some(Protocol::IpRaw) => SocketStatus::IpRaw,
                Some(Protocol::MacRaw) => SocketStatus::MacRaw,
                _ => SocketStatus::Closed,
            },
            0x02 if status == SocketStatus::Init => SocketStatus::Listen,
            0x04 if status == SocketStatus::Init => SocketStatus::SynSent,
            0x08 => SocketStatus::FinWait,
            0x10 => SocketStatus::Closed,
            0x20 => {
                self.send(s, status);
                return;
            }
            _ => status,
        };
        self.set8(s, socket::SR, next.as_u8());
    }

    fn send(&mut self, s: u8, status: SocketStatus) {
        if self.close_on_send {
            self.set8(s, socket::SR, SocketStatus::Closed.as_u8());
            return;
        }
        if self.stall_sends {
            return;
        }
        self.drain(s, status);
        let flag = if self.datagram_timeout && status.is_datagram() {
            SocketInterrupt::TIMEOUT
        } else {
            SocketInterrupt::SEND_OK
        };
        let ir = self.get8(s, socket::IR);
        self.set8(s, socket::IR, ir | flag.bits());
    }

    /// Move everything between TX_RD and TX_WR onto the "wire"
    fn drain(&mut self, s: u8, status: SocketStatus) {
        let rd = self.get16(s, socket::TX_RD);
        let wr = self.get16(s, socket::TX_WR);
        let base = 0x4000 + s as usize * SIM_SOCKET_SIZE as usize;
        let bytes: Vec<u8> = (0..wr.wrapping_sub(rd))
            .map(|i| self.mem[base + (rd.wrapping_add(i) & (SIM_SOCKET_SIZE - 1)) as usize])
            .collect();

        if status.is_datagram() {
            let a = socket_reg(s, socket::DIPR) as usize;
            let addr = Ipv4Addr::new(self.mem[a], self.mem[a + 1], self.mem[a + 2], self.mem[a + 3]);
            let port = self.get16(s, socket::DPORT);
            self.datagrams.push((s, addr, port, bytes));
        } else {
            if self.lag_acks {
                let n = bytes.len() as u16;
                self.unacked[s as usize] = self.unacked[s as usize].wrapping_add(n);
            }
            self.sent[s as usize].extend_from_slice(&bytes);
        }
        self.set16(s, socket::TX_RD, wr);
    }

    fn poke(&mut self, addr: u16, byte: u8) {
        if addr == common::MR {
            if byte & mode::RST != 0 {
                self.reset();
                self.mem[0] = if self.stick_reset { mode::RST } else { 0 };
            } else {
                self.mem[0] = byte;
            }
            return;
        }

        let sockets = SOCKET_BASE..SOCKET_BASE + MAX_SOCKETS as u16 * SOCKET_STRIDE;
        if sockets.contains(&addr) {
            let s = ((addr - SOCKET_BASE) / SOCKET_STRIDE) as u8;
            let offset = (addr - SOCKET_BASE) % SOCKET_STRIDE;
            match offset {
                socket::CR if self.stick_commands => self.mem[addr as usize] = byte,
                socket::CR => self.command(s, byte),
                socket::IR => self.set8(s, socket::IR, self.get8(s, socket::IR) & !byte),
                // Read-only: status and chip-maintained counters
                socket::SR => {}
                o if (socket::TX_FSR..socket::TX_WR).contains(&o) => {}
                o if (socket::RX_RSR..socket::RX_RD).contains(&o) => {}
                _ => self.mem[addr as usize] = byte,
            }
            self.refresh(s);
            return;
        }

        self.mem[addr as usize] = byte;
    }
}

impl SimChip {
    pub fn new() -> Self {
        let mut state = SimState {
            mem: vec![0; 0x8000],
            accesses: 0,
            rx_write: [0; MAX_SOCKETS as usize],
            sent: Default::default(),
            datagrams: Vec::new(),
            stick_reset: false,
            jitter: 0,
            stall_sends: false,
            stick_commands: false,
            lag_acks: false,
            unacked: [0; MAX_SOCKETS as usize],
            datagram_timeout: false,
            close_on_send: false,
        };
        state.reset();
        Self {
            state: Mutex::new(RefCell::new(state)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    /// Read memory without counting an access
    pub fn peek(&self, addr: u16) -> u8 {
        self.with(|st| st.mem[addr as usize])
    }

    /// Number of `read`/`write` calls so far
    pub fn accesses(&self) -> usize {
        self.with(|st| st.accesses)
    }

    pub fn status(&self, s: u8) -> SocketStatus {
        self.with(|st| SocketStatus::from_u8(st.get8(s, socket::SR)))
    }

    /// Force a status, as the peer or the chip's protocol engine would
    pub fn set_status(&self, s: u8, status: SocketStatus) {
        self.with(|st| st.set8(s, socket::SR, status.as_u8()));
    }

    /// Append bytes to a socket's receive buffer
    pub fn deliver(&self, s: u8, bytes: &[u8]) {
        self.with(|st| {
            let base = 0x6000 + s as usize * SIM_SOCKET_SIZE as usize;
            for &b in bytes {
                let ptr = st.rx_write[s as usize];
                st.mem[base + (ptr & (SIM_SOCKET_SIZE - 1)) as usize] = b;
                st.rx_write[s as usize] = ptr.wrapping_add(1);
            }
            let ir = st.get8(s, socket::IR);
            st.set8(s, socket::IR, ir | SocketInterrupt::RECV.bits());
            st.refresh(s);
        });
    }

    /// Append a UDP datagram with its 8-byte header
    pub fn deliver_udp(&self, s: u8, from: Ipv4Addr, port: u16, payload: &[u8]) {
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&from.octets());
        frame.extend_from_slice(&port.to_be_bytes());
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        self.deliver(s, &frame);
    }

    /// Stream bytes sent so far on a socket
    pub fn sent(&self, s: u8) -> Vec<u8> {
        self.with(|st| st.sent[s as usize].clone())
    }

    /// Datagrams sent so far: (socket, destination, port, payload)
    pub fn datagrams(&self) -> Vec<(u8, Ipv4Addr, u16, Vec<u8>)> {
        self.with(|st| st.datagrams.clone())
    }

    /// Keep MR.RST set after a reset
    pub fn stick_reset(&self, stick: bool) {
        self.with(|st| st.stick_reset = stick);
    }

    /// Make the next `reads` counter reads disagree with each other
    pub fn jitter_counters(&self, reads: u8) {
        self.with(|st| st.jitter = reads);
    }

    /// Leave SEND commands pending: no drain, no SEND_OK
    pub fn stall_sends(&self, stall: bool) {
        self.with(|st| st.stall_sends = stall);
    }

    /// Leave socket commands in CR, as a wedged chip would
    pub fn stick_commands(&self, stick: bool) {
        self.with(|st| st.stick_commands = stick);
    }

    /// Finish a stalled send
    pub fn complete_send(&self, s: u8) {
        self.with(|st| {
            if st.get16(s, socket::TX_RD) == st.get16(s, socket::TX_WR) {
                return;
            }
            let status = SocketStatus::from_u8(st.get8(s, socket::SR));
            st.drain(s, status);
            let ir = st.get8(s, socket::IR);
            st.set8(s, socket::IR, ir | SocketInterrupt::SEND_OK.bits());
            st.refresh(s);
        });
    }

    /// Keep sent stream bytes counted against the free size until
    /// [`acknowledge`](Self::acknowledge), as a peer with a closed window would
    pub fn lag_acks(&self, lag: bool) {
        self.with(|st| st.lag_acks = lag);
    }

    /// The peer acknowledges everything on the wire
    pub fn acknowledge(&self, s: u8) {
        self.with(|st| {
            st.unacked[s as usize] = 0;
            st.refresh(s);
        });
    }

    /// Set interrupt flags, as the chip would
    pub fn raise(&self, s: u8, flags: SocketInterrupt) {
        self.with(|st| {
            let ir = st.get8(s, socket::IR);
            st.set8(s, socket::IR, ir | flags.bits());
        });
    }

    /// Answer datagram sends with the TIMEOUT flag (ARP failure)
    pub fn datagram_timeout(&self, timeout: bool) {
        self.with(|st| st.datagram_timeout = timeout);
    }

    /// Drop the connection when SEND is issued (peer reset)
    pub fn close_on_send(&self, close: bool) {
        self.with(|st| st.close_on_send = close);
    }
}

impl RegisterAccess for SimChip {
    type Error = Infallible;

    fn read(&self, addr: u16, buf: &mut [u8]) -> Result<(), Infallible> {
        self.with(|st| {
            st.accesses += 1;
            let a = addr as usize;
            buf.copy_from_slice(&st.mem[a..a + buf.len()]);

            let offset = addr.checked_sub(SOCKET_BASE).map(|o| o % SOCKET_STRIDE);
            let counter = matches!(offset, Some(socket::TX_FSR) | Some(socket::RX_RSR));
            if counter && st.jitter > 0 && !buf.is_empty() {
                let last = buf.len() - 1;
                buf[last] ^= st.jitter;
                st.jitter -= 1;
            }
        });
        Ok(())
    }

    fn write(&self, addr: u16, data: &[u8]) -> Result<(), Infallible> {
        self.with(|st| {
            st.accesses += 1;
            for (i, &b) in data.iter().enumerate() {
                st.poke(addr.wrapping_add(i as u16), b);
            }
        });
        Ok(())
    }
}

pub type SimW5100 = W5100<SimChip, MockKernel>;

/// Chip over a fresh simulator, with its own port table
pub fn sim_chip() -> &'static SimW5100 {
    leak(W5100::with_ports(SimChip::new(), leak(PortAllocator::new())))
}
