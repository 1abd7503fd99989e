//! W5100 register map
//!
//! Addresses, opcodes and flag values are fixed by the silicon.

/// SPI frame opcode for a register write
pub const OP_WRITE: u8 = 0xF0;
/// SPI frame opcode for a register read
pub const OP_READ: u8 = 0x0F;

/// Common register addresses
pub mod common {
    /// Mode
    pub const MR: u16 = 0x0000;
    /// Gateway address (4 bytes)
    pub const GAR: u16 = 0x0001;
    /// Subnet mask (4 bytes)
    pub const SUBR: u16 = 0x0005;
    /// Source hardware address (6 bytes)
    pub const SHAR: u16 = 0x0009;
    /// Source IP address (4 bytes)
    pub const SIPR: u16 = 0x000F;
    /// Interrupt
    pub const IR: u16 = 0x0015;
    /// Interrupt mask
    pub const IMR: u16 = 0x0016;
    /// Retry time, 100 µs units (2 bytes)
    pub const RTR: u16 = 0x0017;
    /// Retry count
    pub const RCR: u16 = 0x0019;
    /// RX memory size per socket
    pub const RMSR: u16 = 0x001A;
    /// TX memory size per socket
    pub const TMSR: u16 = 0x001B;
    /// Authentication type in PPPoE (2 bytes)
    pub const PATR: u16 = 0x001C;
    /// Unreachable IP address (4 bytes)
    pub const UIPR: u16 = 0x002A;
    /// Unreachable port (2 bytes)
    pub const UPORT: u16 = 0x002E;
}

/// Common mode register bits
pub mod mode {
    /// Software reset, self-clearing
    pub const RST: u8 = 0x80;
    /// Ping block
    pub const PB: u8 = 0x10;
    /// PPPoE mode
    pub const PPPOE: u8 = 0x08;
    /// Address auto-increment (parallel bus only)
    pub const AI: u8 = 0x02;
    /// Indirect bus interface
    pub const IND: u8 = 0x01;
}

/// Socket register offsets within a socket's register block
pub mod socket {
    /// Mode
    pub const MR: u16 = 0x00;
    /// Command
    pub const CR: u16 = 0x01;
    /// Interrupt
    pub const IR: u16 = 0x02;
    /// Status
    pub const SR: u16 = 0x03;
    /// Source port (2 bytes)
    pub const PORT: u16 = 0x04;
    /// Destination hardware address (6 bytes)
    pub const DHAR: u16 = 0x06;
    /// Destination IP address (4 bytes)
    pub const DIPR: u16 = 0x0C;
    /// Destination port (2 bytes)
    pub const DPORT: u16 = 0x10;
    /// Maximum segment size (2 bytes)
    pub const MSSR: u16 = 0x12;
    /// IP protocol number in IPRAW mode
    pub const PROTO: u16 = 0x14;
    /// IP type of service
    pub const TOS: u16 = 0x15;
    /// IP time to live
    pub const TTL: u16 = 0x16;
    /// TX free size (2 bytes)
    pub const TX_FSR: u16 = 0x20;
    /// TX read pointer (2 bytes)
    pub const TX_RD: u16 = 0x22;
    /// TX write pointer (2 bytes)
    pub const TX_WR: u16 = 0x24;
    /// RX received size (2 bytes)
    pub const RX_RSR: u16 = 0x26;
    /// RX read pointer (2 bytes)
    pub const RX_RD: u16 = 0x28;
}

/// Number of hardware sockets
pub const MAX_SOCKETS: u8 = 4;

/// First socket register block
pub const SOCKET_BASE: u16 = 0x0400;

/// Distance between socket register blocks
pub const SOCKET_STRIDE: u16 = 0x0100;

/// Start of TX buffer memory
pub const TX_BASE: u16 = 0x4000;

/// Start of RX buffer memory
pub const RX_BASE: u16 = 0x6000;

/// Size of each of the TX and RX buffer memories
pub const BUFFER_MEMORY_SIZE: u16 = 0x2000;

/// Address of a socket register
pub const fn socket_reg(socket: u8, offset: u16) -> u16 {
    SOCKET_BASE + socket as u16 * SOCKET_STRIDE + offset
}

/// Socket commands written to Sn_CR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Initialize the socket according to Sn_MR
    Open = 0x01,
    /// Wait for a TCP connection request
    Listen = 0x02,
    /// Send a TCP connection request to Sn_DIPR:Sn_DPORT
    Connect = 0x04,
    /// Send a TCP FIN
    Discon = 0x08,
    /// Close immediately
    Close = 0x10,
    /// Transmit data up to Sn_TX_WR
    Send = 0x20,
    /// UDP send using Sn_DHAR without ARP
    SendMac = 0x21,
    /// TCP keep-alive probe
    SendKeep = 0x22,
    /// Acknowledge data consumed up to Sn_RX_RD
    Recv = 0x40,
}

impl Command {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Socket protocol, low nibble of Sn_MR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Protocol {
    Closed = 0x00,
    Tcp = 0x01,
    Udp = 0x02,
    IpRaw = 0x03,
    MacRaw = 0x04,
    Pppoe = 0x05,
}

impl Protocol {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value & 0x0F {
            0x00 => Some(Protocol::Closed),
            0x01 => Some(Protocol::Tcp),
            0x02 => Some(Protocol::Udp),
            0x03 => Some(Protocol::IpRaw),
            0x04 => Some(Protocol::MacRaw),
            0x05 => Some(Protocol::Pppoe),
            _ => None,
        }
    }

    /// Connectionless protocols deliver framed datagrams
    pub fn is_datagram(self) -> bool {
        matches!(self, Protocol::Udp | Protocol::IpRaw | Protocol::MacRaw)
    }
}

/// Option bits, high nibble of Sn_MR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketFlags(u8);

impl SocketFlags {
    pub const NONE: Self = Self(0);
    /// TCP: acknowledge immediately. UDP multicast: use IGMP v1
    pub const NO_DELAYED_ACK: Self = Self(0x20);
    /// UDP: enable multicast
    pub const MULTICAST: Self = Self(0x80);

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Keep only the option bits of a raw Sn_MR value
    pub fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & 0xF0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for SocketFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Socket interrupt flags in Sn_IR
///
/// Flags are cleared by writing a 1 to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketInterrupt(u8);

impl SocketInterrupt {
    pub const NONE: Self = Self(0);
    /// Connection established
    pub const CON: Self = Self(0x01);
    /// FIN received or disconnect complete
    pub const DISCON: Self = Self(0x02);
    /// Data received
    pub const RECV: Self = Self(0x04);
    /// ARP or TCP retransmission timed out
    pub const TIMEOUT: Self = Self(0x08);
    /// SEND command completed
    pub const SEND_OK: Self = Self(0x10);
    /// Every flag
    pub const ALL: Self = Self(0x1F);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for SocketInterrupt {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
