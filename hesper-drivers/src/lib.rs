//! Hardware driver implementations
//!
//! This crate provides the drivers built on the `hesper-core` channel
//! discipline and the `hesper-net` chip model:
//!
//! - Interrupt-driven peripherals: [`serial`] (UART), [`spi`] (SPI master),
//!   [`adc`] (analog converter)
//! - The W5100 network chip: register bus client, chip setup and the
//!   Berkeley-style [`w5100::Socket`]

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
mod fmt;

pub mod adc;
pub mod serial;
pub mod spi;
pub mod w5100;

#[cfg(test)]
pub(crate) mod testing;

pub use adc::{AdcDriver, Sample};
pub use serial::{SerialDriver, SerialError};
pub use spi::{SpiDriver, SpiError};
pub use w5100::{
    BusClient, BusError, RegisterAccess, Socket, SocketError, TaskBusClient, TaskRawMutex, W5100,
};
