//! Interrupt-driven SPI master
//!
//! A transfer-complete interrupt only fires after a byte has been written,
//! so the transmit channel alone cannot start the bus. `write()` shifts the
//! first byte out itself when the bus is idle; the handler then stores the
//! byte shifted in and chains the next queued byte until the channel is
//! empty.
//!
//! `&SpiDriver` implements [`embedded_hal::spi::SpiBus`], one full-duplex
//! exchange per word, so it can back the W5100 bus client.

use core::cell::Cell;

use critical_section::Mutex;
use embedded_hal::spi::{ErrorKind, ErrorType, SpiBus};
use hesper_core::channel::{Channel, ChannelError};
use hesper_core::isr::{Epilogue, Woken};
use hesper_core::registry::InterruptHandler;
use hesper_hal::kernel::{Kernel, Timeout};
use hesper_hal::spi::{SpiConfig, SpiRegisters};

/// Default channel capacity in each direction
pub const DEFAULT_BUFFER: usize = 16;

/// Receive attempts made without sleeping before `exchange` blocks
///
/// At bus speed a byte completes in a few microseconds, well under a tick.
const SPIN_POLLS: u32 = 32;

/// SPI driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiError {
    /// The transfer did not complete before the deadline
    Timeout,
    /// `exchange` was called before `start()`
    NotStarted,
}

impl embedded_hal::spi::Error for SpiError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl From<ChannelError> for SpiError {
    fn from(_: ChannelError) -> Self {
        SpiError::Timeout
    }
}

/// Interrupt-driven SPI master
pub struct SpiDriver<S, K, const TX: usize = DEFAULT_BUFFER, const RX: usize = DEFAULT_BUFFER> {
    regs: S,
    tx: Channel<u8, TX, K>,
    rx: Channel<u8, RX, K>,
    sentinel: u8,
    busy: Mutex<Cell<bool>>,
    started: Mutex<Cell<bool>>,
    collisions: Mutex<Cell<u8>>,
    overruns: Mutex<Cell<u8>>,
    bus_timeout: Mutex<Cell<Timeout>>,
}

impl<S, K, const TX: usize, const RX: usize> SpiDriver<S, K, TX, RX>
where
    S: SpiRegisters,
    K: Kernel,
{
    /// Create a stopped driver
    ///
    /// `sentinel` replaces bytes lost to a write collision.
    pub const fn new(regs: S, sentinel: u8) -> Self {
        Self {
            regs,
            tx: Channel::new(),
            rx: Channel::new(),
            sentinel,
            busy: Mutex::new(Cell::new(false)),
            started: Mutex::new(Cell::new(false)),
            collisions: Mutex::new(Cell::new(0)),
            overruns: Mutex::new(Cell::new(0)),
            bus_timeout: Mutex::new(Cell::new(Timeout::Forever)),
        }
    }

    /// Program the peripheral and start any bytes already queued
    pub fn start(&self, config: &SpiConfig) {
        self.regs.configure(config);
        self.regs.set_enabled(true);
        critical_section::with(|cs| self.started.borrow(cs).set(true));
        self.kick();
        debug!("spi: started at {} Hz", config.frequency);
    }

    /// Disable the peripheral and its interrupt
    pub fn stop(&self) {
        self.regs.set_interrupt(false);
        self.regs.set_enabled(false);
        critical_section::with(|cs| {
            self.started.borrow(cs).set(false);
            self.busy.borrow(cs).set(false);
        });
    }

    pub fn is_started(&self) -> bool {
        critical_section::with(|cs| self.started.borrow(cs).get())
    }

    /// A transfer is in flight
    pub fn is_busy(&self) -> bool {
        critical_section::with(|cs| self.busy.borrow(cs).get())
    }

    /// Per-word timeout used by the [`SpiBus`] implementation
    pub fn set_bus_timeout(&self, timeout: Timeout) {
        critical_section::with(|cs| self.bus_timeout.borrow(cs).set(timeout));
    }

    /// Bytes shifted in and not yet read
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Take the next byte shifted in
    pub fn read(&self, timeout: Timeout) -> Result<u8, ChannelError> {
        self.rx.receive(timeout)
    }

    /// Queue a byte to shift out, starting the bus if it is idle
    pub fn write(&self, byte: u8, timeout: Timeout) -> Result<(), ChannelError> {
        self.tx.send(byte, timeout)?;
        if self.is_started() {
            self.kick();
        }
        Ok(())
    }

    /// One full-duplex byte exchange
    pub fn exchange(&self, byte: u8, timeout: Timeout) -> Result<u8, SpiError> {
        if !self.is_started() {
            return Err(SpiError::NotStarted);
        }
        self.write(byte, timeout)?;
        for _ in 0..SPIN_POLLS {
            if let Ok(b) = self.rx.receive(Timeout::Immediate) {
                return Ok(b);
            }
        }
        self.rx.receive(timeout).map_err(|_| {
            warn!("spi: exchange timed out");
            SpiError::Timeout
        })
    }

    /// Write collisions since the last clear (saturating)
    pub fn collision_count(&self) -> u8 {
        critical_section::with(|cs| self.collisions.borrow(cs).get())
    }

    pub fn clear_collisions(&self) {
        critical_section::with(|cs| self.collisions.borrow(cs).set(0));
    }

    /// Bytes shifted in while the receive channel was full (saturating)
    ///
    /// A non-zero count means later `exchange` results no longer line up
    /// with the bytes written; drain with `read` before relying on them.
    pub fn overrun_count(&self) -> u8 {
        critical_section::with(|cs| self.overruns.borrow(cs).get())
    }

    pub fn clear_overruns(&self) {
        critical_section::with(|cs| self.overruns.borrow(cs).set(0));
    }

    /// Shift the next queued byte out if no transfer is in flight
    fn kick(&self) {
        critical_section::with(|cs| {
            let busy = self.busy.borrow(cs);
            if busy.get() {
                return;
            }
            if let Ok(byte) = self.tx.receive(Timeout::Immediate) {
                busy.set(true);
                self.regs.set_interrupt(true);
                self.regs.write_data(byte);
            }
        });
    }

    fn count_collision(&self) {
        critical_section::with(|cs| {
            let c = self.collisions.borrow(cs);
            c.set(c.get().saturating_add(1));
        });
    }

    /// Transfer-complete handler body (interrupt context)
    pub fn on_transfer_complete(&self) -> Woken {
        let collided = self.regs.write_collision();
        let data = self.regs.read_data();
        let byte = if collided {
            self.count_collision();
            self.sentinel
        } else {
            data
        };

        let mut woken = match self.rx.send_from_isr(byte) {
            Ok(woken) => woken,
            Err(_) => {
                critical_section::with(|cs| {
                    let c = self.overruns.borrow(cs);
                    c.set(c.get().saturating_add(1));
                });
                Woken::NONE
            }
        };

        match self.tx.receive_from_isr() {
            Ok((next, w)) => {
                woken |= w;
                self.regs.write_data(next);
            }
            Err(_) => {
                self.regs.set_interrupt(false);
                critical_section::with(|cs| self.busy.borrow(cs).set(false));
            }
        }
        woken
    }

    fn bus_timeout(&self) -> Timeout {
        critical_section::with(|cs| self.bus_timeout.borrow(cs).get())
    }
}

impl<S, K, const TX: usize, const RX: usize> InterruptHandler for SpiDriver<S, K, TX, RX>
where
    S: SpiRegisters + Sync,
    K: Kernel,
{
    fn on_interrupt(&self, epilogue: &mut Epilogue) {
        if self.regs.interrupt_enabled() && self.regs.transfer_complete() {
            epilogue.note(self.on_transfer_complete());
        }
    }
}

impl<S, K, const TX: usize, const RX: usize> Drop for SpiDriver<S, K, TX, RX> {
    fn drop(&mut self) {
        if critical_section::with(|cs| self.started.borrow(cs).get()) {
            fatal!("spi: driver dropped while started");
        }
    }
}

impl<S, K, const TX: usize, const RX: usize> ErrorType for &SpiDriver<S, K, TX, RX> {
    type Error = SpiError;
}

impl<S, K, const TX: usize, const RX: usize> SpiBus<u8> for &SpiDriver<S, K, TX, RX>
where
    S: SpiRegisters,
    K: Kernel,
{
    fn read(&mut self, words: &mut [u8]) -> Result<(), SpiError> {
        let timeout = self.bus_timeout();
        for word in words.iter_mut() {
            *word = self.exchange(0x00, timeout)?;
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), SpiError> {
        let timeout = self.bus_timeout();
        for &word in words {
            self.exchange(word, timeout)?;
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SpiError> {
        let timeout = self.bus_timeout();
        for i in 0..read.len().max(write.len()) {
            let byte = self.exchange(write.get(i).copied().unwrap_or(0x00), timeout)?;
            if let Some(slot) = read.get_mut(i) {
                *slot = byte;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), SpiError> {
        let timeout = self.bus_timeout();
        for word in words.iter_mut() {
            *word = self.exchange(*word, timeout)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SpiError> {
        let deadline = self.bus_timeout().start::<K>();
        while self.is_busy() || !self.tx.is_empty() {
            if deadline.expired::<K>() {
                return Err(SpiError::Timeout);
            }
            K::delay(1);
        }
        Ok(())
    }
}
