//! Hesper Hardware Abstraction Layer
//!
//! This crate defines the seams between the Hesper drivers and the board
//! they run on. Two kinds of collaborator live here:
//!
//! - The real-time scheduler substrate ([`kernel::Kernel`]): tick counter,
//!   delay and the "yield from interrupt" request, plus the scheduler's
//!   recursive mutex ([`kernel::TaskMutex`]).
//! - Register-level access to the interrupt-driven peripherals
//!   ([`uart::UartRegisters`], [`spi::SpiRegisters`], [`adc::AdcRegisters`]).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application tasks                      │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  hesper-drivers (serial, spi, adc,      │
//! │                  w5100 sockets)         │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  hesper-hal (this crate - traits)       │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ scheduler     │       │ chip register │
//! │ port          │       │ blocks        │
//! └───────────────┘       └───────────────┘
//! ```

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod adc;
pub mod kernel;
pub mod spi;
pub mod uart;

// Re-export key traits at crate root for convenience
pub use adc::{AdcConfig, AdcRegisters};
pub use kernel::{Deadline, Kernel, TaskMutex, Ticks, Timeout};
pub use spi::{SpiConfig, SpiRegisters};
pub use uart::{UartConfig, UartRegisters};
