//! Interrupt-to-task communication primitives
//!
//! Every interrupt-driven peripheral driver in Hesper follows the same
//! discipline:
//!
//! - Data crosses between interrupt and task context only through a
//!   bounded [`channel::Channel`]. Task code uses the blocking variants,
//!   interrupt code the non-blocking `*_from_isr` variants.
//! - Interrupt-side operations report whether they made a blocked task
//!   runnable ([`isr::Woken`]). The handler collects these in an
//!   [`isr::Epilogue`] which asks the scheduler for a context switch on
//!   the way out.
//! - A shared interrupt vector finds the driver object that owns it through
//!   a static [`registry::Registry`].

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
mod fmt;

pub mod channel;
pub mod isr;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{Channel, ChannelError};
pub use isr::{Epilogue, Woken};
pub use registry::{InterruptHandler, Registry, RegistryError};
