//! Datagram headers in the receive buffer
//!
//! In UDP, IPRAW and MACRAW modes the chip prefixes every received datagram
//! with a small big-endian header:
//!
//! ```text
//! UDP:    ┌──────────┬──────┬────────┐
//!         │ src IP 4 │ port │ length │   8 bytes
//!         └──────────┴──────┴────────┘
//! IPRAW:  ┌──────────┬────────┐
//!         │ src IP 4 │ length │          6 bytes
//!         └──────────┴────────┘
//! MACRAW: ┌────────┐
//!         │ length │                     2 bytes
//!         └────────┘
//! ```
//!
//! In MACRAW mode the length counts itself.

use core::net::Ipv4Addr;

use crate::regs::Protocol;

/// Largest datagram header
pub const MAX_HEADER_LEN: usize = 8;

/// Decoded datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Sender address (unspecified in MACRAW mode)
    pub addr: Ipv4Addr,
    /// Sender port (zero outside UDP)
    pub port: u16,
    /// Payload length following the header
    pub len: u16,
}

impl DatagramHeader {
    /// Header size for a protocol, `None` for stream protocols
    pub fn size(protocol: Protocol) -> Option<usize> {
        match protocol {
            Protocol::Udp => Some(8),
            Protocol::IpRaw => Some(6),
            Protocol::MacRaw => Some(2),
            _ => None,
        }
    }

    /// Decode a header
    ///
    /// `raw` must hold at least [`size`](Self::size) bytes.
    pub fn parse(protocol: Protocol, raw: &[u8]) -> Option<Self> {
        let size = Self::size(protocol)?;
        if raw.len() < size {
            return None;
        }
        let be16 = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
        let ip = || Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]);

        let header = match protocol {
            Protocol::Udp => Self {
                addr: ip(),
                port: be16(4),
                len: be16(6),
            },
            Protocol::IpRaw => Self {
                addr: ip(),
                port: 0,
                len: be16(4),
            },
            _ => Self {
                addr: Ipv4Addr::UNSPECIFIED,
                port: 0,
                len: be16(0).saturating_sub(2),
            },
        };
        Some(header)
    }
}
