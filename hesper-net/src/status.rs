//! Socket status register
//!
//! Sn_SR mirrors the chip's internal protocol state. Every driver decision
//! of the form "is there any point in waiting longer?" goes through
//! [`SocketStatus::liveness`] so the answer is defined in one place.

/// Value of a socket's status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketStatus {
    Closed,
    /// Opened in TCP mode, neither listening nor connecting
    Init,
    Listen,
    SynSent,
    SynRecv,
    Established,
    FinWait,
    Closing,
    TimeWait,
    /// Peer sent FIN; data may still be buffered
    CloseWait,
    LastAck,
    Udp,
    IpRaw,
    MacRaw,
    Pppoe,
    /// Resolving the peer's hardware address (0x11, 0x21, 0x31)
    Arp(u8),
    /// Undocumented value
    Other(u8),
}

/// Whether a socket in a given status may still make progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Liveness {
    /// Open and able to progress
    Alive,
    /// No transfer possible without reopening
    Dead,
    /// Transient or undocumented; pollers keep polling
    Indeterminate,
}

impl SocketStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => SocketStatus::Closed,
            0x13 => SocketStatus::Init,
            0x14 => SocketStatus::Listen,
            0x15 => SocketStatus::SynSent,
            0x16 => SocketStatus::SynRecv,
            0x17 => SocketStatus::Established,
            0x18 => SocketStatus::FinWait,
            0x1A => SocketStatus::Closing,
            0x1B => SocketStatus::TimeWait,
            0x1C => SocketStatus::CloseWait,
            0x1D => SocketStatus::LastAck,
            0x22 => SocketStatus::Udp,
            0x32 => SocketStatus::IpRaw,
            0x42 => SocketStatus::MacRaw,
            0x5F => SocketStatus::Pppoe,
            0x11 | 0x21 | 0x31 => SocketStatus::Arp(value),
            other => SocketStatus::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SocketStatus::Closed => 0x00,
            SocketStatus::Init => 0x13,
            SocketStatus::Listen => 0x14,
            SocketStatus::SynSent => 0x15,
            SocketStatus::SynRecv => 0x16,
            SocketStatus::Established => 0x17,
            SocketStatus::FinWait => 0x18,
            SocketStatus::Closing => 0x1A,
            SocketStatus::TimeWait => 0x1B,
            SocketStatus::CloseWait => 0x1C,
            SocketStatus::LastAck => 0x1D,
            SocketStatus::Udp => 0x22,
            SocketStatus::IpRaw => 0x32,
            SocketStatus::MacRaw => 0x42,
            SocketStatus::Pppoe => 0x5F,
            SocketStatus::Arp(raw) | SocketStatus::Other(raw) => raw,
        }
    }

    /// Classify for poll loops
    ///
    /// ARP resolution and undocumented values are `Indeterminate`: the chip
    /// documents ARP as transient but does not say which status follows a
    /// failed resolution. Pollers treat them as alive and log them.
    pub fn liveness(self) -> Liveness {
        match self {
            s if s.is_terminal() => Liveness::Dead,
            SocketStatus::Arp(_) | SocketStatus::Other(_) => Liveness::Indeterminate,
            _ => Liveness::Alive,
        }
    }

    /// No further transfer is possible without reopening
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SocketStatus::Closed
                | SocketStatus::FinWait
                | SocketStatus::Closing
                | SocketStatus::TimeWait
                | SocketStatus::LastAck
        )
    }

    /// A TCP connection is up (data may be sent and received)
    pub fn is_connected(self) -> bool {
        matches!(self, SocketStatus::Established | SocketStatus::CloseWait)
    }

    /// An empty receive buffer in this status means end of stream
    pub fn is_end_of_stream(self) -> bool {
        self.is_terminal() || matches!(self, SocketStatus::Listen | SocketStatus::CloseWait)
    }

    /// Open in a connectionless mode
    pub fn is_datagram(self) -> bool {
        matches!(
            self,
            SocketStatus::Udp | SocketStatus::IpRaw | SocketStatus::MacRaw
        )
    }
}

impl From<u8> for SocketStatus {
    fn from(value: u8) -> Self {
        SocketStatus::from_u8(value)
    }
}
