//! Interrupt-driven UART driver
//!
//! Tasks never touch the UART data register. Outgoing bytes are queued in
//! the transmit channel and drained by the data-register-empty interrupt;
//! incoming bytes are pushed into the receive channel by the
//! receive-complete interrupt.
//!
//! # Interrupt discipline
//!
//! - `start()` arms the transmit interrupt only if bytes are already
//!   queued, so the first interrupt always has work to do.
//! - When the transmit channel runs dry the handler disarms the transmit
//!   interrupt; the next `write()` re-arms it.
//! - A byte received with a framing, overrun or parity error is replaced by
//!   the sentinel byte rather than dropped, so consumers that count bytes
//!   see a placeholder instead of a gap.

use core::cell::Cell;

use critical_section::Mutex;
use hesper_core::channel::{Channel, ChannelError};
use hesper_core::isr::{Epilogue, Woken};
use hesper_core::registry::InterruptHandler;
use hesper_hal::kernel::{Kernel, Timeout};
use hesper_hal::uart::{UartConfig, UartRegisters};

/// Default channel capacity in each direction
pub const DEFAULT_BUFFER: usize = 64;

/// Serial errors outside the channel's own full/empty results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialError {
    /// Transmission did not finish before the deadline
    Timeout,
}

/// Interrupt-driven UART
pub struct SerialDriver<U, K, const TX: usize = DEFAULT_BUFFER, const RX: usize = DEFAULT_BUFFER> {
    regs: U,
    tx: Channel<u8, TX, K>,
    rx: Channel<u8, RX, K>,
    sentinel: u8,
    errors: Mutex<Cell<u8>>,
    started: Mutex<Cell<bool>>,
}

impl<U, K, const TX: usize, const RX: usize> SerialDriver<U, K, TX, RX>
where
    U: UartRegisters,
    K: Kernel,
{
    /// Create a stopped driver
    ///
    /// `sentinel` replaces bytes received with a line error.
    pub const fn new(regs: U, sentinel: u8) -> Self {
        Self {
            regs,
            tx: Channel::new(),
            rx: Channel::new(),
            sentinel,
            errors: Mutex::new(Cell::new(0)),
            started: Mutex::new(Cell::new(false)),
        }
    }

    /// Program the UART and enable it
    pub fn start(&self, config: &UartConfig) {
        self.regs.configure(config);
        self.regs.set_enabled(true, true);
        self.regs.set_rx_interrupt(true);
        critical_section::with(|cs| self.started.borrow(cs).set(true));
        if !self.tx.is_empty() {
            self.regs.set_tx_interrupt(true);
        }
        debug!("serial: started at {} baud", config.baudrate);
    }

    /// Disable the UART and its interrupts
    ///
    /// Queued bytes stay queued for the next `start()`.
    pub fn stop(&self) {
        self.regs.set_rx_interrupt(false);
        self.regs.set_tx_interrupt(false);
        self.regs.set_enabled(false, false);
        critical_section::with(|cs| self.started.borrow(cs).set(false));
    }

    /// Re-enable receiver and transmitter after `disable()`
    pub fn enable(&self) {
        self.regs.set_enabled(true, true);
        self.regs.set_rx_interrupt(true);
        if !self.tx.is_empty() {
            self.regs.set_tx_interrupt(true);
        }
    }

    /// Disable receiver and transmitter without forgetting the configuration
    pub fn disable(&self) {
        self.regs.set_rx_interrupt(false);
        self.regs.set_tx_interrupt(false);
        self.regs.set_enabled(false, false);
    }

    pub fn is_started(&self) -> bool {
        critical_section::with(|cs| self.started.borrow(cs).get())
    }

    /// Number of received bytes waiting
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Take the next received byte
    pub fn read(&self, timeout: Timeout) -> Result<u8, ChannelError> {
        self.rx.receive(timeout)
    }

    /// Look at the next received byte without taking it
    pub fn peek(&self, timeout: Timeout) -> Result<u8, ChannelError> {
        self.rx.peek(timeout)
    }

    /// Queue a byte for transmission
    ///
    /// Re-arms the transmit interrupt every time; arming an armed interrupt
    /// is harmless. Before `start()` the byte is only queued.
    pub fn write(&self, byte: u8, timeout: Timeout) -> Result<(), ChannelError> {
        self.tx.send(byte, timeout)?;
        if self.is_started() {
            self.regs.set_tx_interrupt(true);
        }
        Ok(())
    }

    /// Queue a run of bytes, returning how many were queued
    ///
    /// `timeout` applies to each byte.
    pub fn write_all(&self, bytes: &[u8], timeout: Timeout) -> usize {
        bytes
            .iter()
            .take_while(|&&b| self.write(b, timeout).is_ok())
            .count()
    }

    /// Wait until every queued byte has left the shift register
    pub fn flush(&self, timeout: Timeout) -> Result<(), SerialError> {
        let deadline = timeout.start::<K>();
        loop {
            if self.tx.is_empty() && self.regs.tx_complete() {
                return Ok(());
            }
            if deadline.expired::<K>() {
                warn!("serial: flush timed out with {} bytes queued", self.tx.len());
                return Err(SerialError::Timeout);
            }
            K::delay(1);
        }
    }

    /// Line errors and receive overflows since the last clear (saturating)
    pub fn error_count(&self) -> u8 {
        critical_section::with(|cs| self.errors.borrow(cs).get())
    }

    pub fn clear_errors(&self) {
        critical_section::with(|cs| self.errors.borrow(cs).set(0));
    }

    fn count_error(&self) {
        critical_section::with(|cs| {
            let errors = self.errors.borrow(cs);
            errors.set(errors.get().saturating_add(1));
        });
    }

    /// Receive-complete handler body (interrupt context)
    pub fn on_receive(&self) -> Woken {
        // Status must be read before data; reading data clears it
        let status = self.regs.rx_status();
        let data = self.regs.read_data();

        let byte = if status.is_error() {
            self.count_error();
            self.sentinel
        } else {
            data
        };

        match self.rx.send_from_isr(byte) {
            Ok(woken) => woken,
            Err(_) => {
                self.count_error();
                Woken::NONE
            }
        }
    }

    /// Data-register-empty handler body (interrupt context)
    pub fn on_transmit_ready(&self) -> Woken {
        match self.tx.receive_from_isr() {
            Ok((byte, woken)) => {
                self.regs.write_data(byte);
                woken
            }
            Err(_) => {
                self.regs.set_tx_interrupt(false);
                Woken::NONE
            }
        }
    }
}

impl<U, K, const TX: usize, const RX: usize> InterruptHandler for SerialDriver<U, K, TX, RX>
where
    U: UartRegisters + Sync,
    K: Kernel,
{
    fn on_interrupt(&self, epilogue: &mut Epilogue) {
        if self.regs.rx_ready() {
            epilogue.note(self.on_receive());
        }
        if self.regs.tx_interrupt_enabled() && self.regs.tx_ready() {
            epilogue.note(self.on_transmit_ready());
        }
    }
}

impl<U, K, const TX: usize, const RX: usize> Drop for SerialDriver<U, K, TX, RX> {
    fn drop(&mut self) {
        if critical_section::with(|cs| self.started.borrow(cs).get()) {
            fatal!("serial: driver dropped while started");
        }
    }
}
