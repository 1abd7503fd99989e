//! W5100 network chip model
//!
//! This crate describes the WIZnet W5100 as seen over its SPI register
//! window, independent of any bus or scheduler:
//!
//! - [`regs`]: register addresses, command opcodes, interrupt flags
//! - [`status`]: the socket status register and its liveness classification
//! - [`window`]: per-socket transmit/receive buffer addressing
//! - [`header`]: per-datagram headers the chip prepends in the receive buffer
//! - [`ports`]: ephemeral source-port allocation
//! - [`config`]: network identity and retry configuration
//!
//! # Memory Map
//!
//! ```text
//! 0x0000 ┌──────────────────────┐
//!        │ common registers     │
//! 0x0400 ├──────────────────────┤
//!        │ socket 0..3 regs     │  0x100 each
//! 0x0800 ├──────────────────────┤
//!        │ reserved             │
//! 0x4000 ├──────────────────────┤
//!        │ TX buffer (8 KiB)    │  split evenly between sockets
//! 0x6000 ├──────────────────────┤
//!        │ RX buffer (8 KiB)    │  split evenly between sockets
//! 0x8000 └──────────────────────┘
//! ```
//!
//! The TCP/UDP/IP protocol machinery runs inside the chip. Software only
//! moves bytes in and out of the buffers and issues socket commands.

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod config;
pub mod header;
pub mod ports;
pub mod regs;
pub mod status;
pub mod window;

pub use config::{MacAddress, NetConfig};
pub use header::DatagramHeader;
pub use ports::{PortAllocator, EPHEMERAL_PORTS};
pub use regs::{Command, Protocol, SocketFlags, SocketInterrupt};
pub use status::{Liveness, SocketStatus};
pub use window::{MemoryLayout, Span, Window};

/// Check a destination for connect/sendto
///
/// The chip cannot send to the limited broadcast address through a TCP
/// socket, to the unspecified address, or to port zero.
pub fn is_valid_destination(addr: core::net::Ipv4Addr, port: u16) -> bool {
    !addr.is_broadcast() && !addr.is_unspecified() && port != 0
}
