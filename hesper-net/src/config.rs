//! Network configuration
//!
//! Identity and retry settings applied to the chip at initialization. With
//! the `serde` feature the configuration can be stored as postcard-encoded
//! bytes, e.g. in EEPROM.

use core::net::Ipv4Addr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest postcard encoding of a [`NetConfig`]
pub const MAX_ENCODED_LEN: usize = 32;

/// Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Locally administered unicast address (second-lowest bit of the
    /// first octet set, lowest clear)
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x03 == 0x02
    }
}

/// Network identity and retransmission settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetConfig {
    /// Hardware address
    pub mac: MacAddress,
    /// Local IPv4 address
    pub ip: [u8; 4],
    /// Default gateway
    pub gateway: [u8; 4],
    /// Subnet mask
    pub subnet: [u8; 4],
    /// Retransmission timeout in 100 µs units
    pub retry_time: u16,
    /// Retransmissions before a TIMEOUT interrupt
    pub retry_count: u8,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            mac: MacAddress([0xDE, 0xAD, 0xBE, 0xEF, 0xFE, 0xED]),
            ip: [192, 168, 1, 177],
            gateway: [192, 168, 1, 1],
            subnet: [255, 255, 255, 0],
            retry_time: 2000, // 200 ms, chip reset value
            retry_count: 8,
        }
    }
}

impl NetConfig {
    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }

    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.gateway)
    }

    pub fn subnet(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.subnet)
    }

    /// Check whether `addr` is on the local subnet
    pub fn is_local(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.subnet());
        u32::from(addr) & mask == u32::from(self.ip()) & mask
    }

    /// Encode for persistent storage
    #[cfg(feature = "serde")]
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], postcard::Error> {
        postcard::to_slice(self, buf)
    }

    /// Decode from persistent storage
    #[cfg(feature = "serde")]
    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
