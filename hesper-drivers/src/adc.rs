//! Interrupt-driven analog converter
//!
//! Tasks queue channel numbers; the conversion-complete interrupt stores
//! each result and starts the next queued conversion, so a burst of
//! requests runs back to back without task involvement.

use core::cell::Cell;

use critical_section::Mutex;
use hesper_core::channel::{Channel, ChannelError};
use hesper_core::isr::{Epilogue, Woken};
use hesper_core::registry::InterruptHandler;
use hesper_hal::adc::{AdcConfig, AdcRegisters, ADC_MAX};
use hesper_hal::kernel::{Kernel, Timeout};

/// Default queue depth for requests and results
pub const DEFAULT_DEPTH: usize = 8;

/// One conversion result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    /// Input channel that was converted
    pub channel: u8,
    /// 10-bit result
    pub value: u16,
}

/// Interrupt-driven ADC
pub struct AdcDriver<A, K, const REQ: usize = DEFAULT_DEPTH, const RES: usize = DEFAULT_DEPTH> {
    regs: A,
    requests: Channel<u8, REQ, K>,
    results: Channel<Sample, RES, K>,
    active: Mutex<Cell<Option<u8>>>,
    started: Mutex<Cell<bool>>,
    dropped: Mutex<Cell<u8>>,
}

impl<A, K, const REQ: usize, const RES: usize> AdcDriver<A, K, REQ, RES>
where
    A: AdcRegisters,
    K: Kernel,
{
    pub const fn new(regs: A) -> Self {
        Self {
            regs,
            requests: Channel::new(),
            results: Channel::new(),
            active: Mutex::new(Cell::new(None)),
            started: Mutex::new(Cell::new(false)),
            dropped: Mutex::new(Cell::new(0)),
        }
    }

    /// Power the converter up and start any queued requests
    pub fn start(&self, config: &AdcConfig) {
        self.regs.configure(config);
        self.regs.set_enabled(true);
        critical_section::with(|cs| self.started.borrow(cs).set(true));
        self.kick();
        debug!("adc: started");
    }

    /// Power the converter down
    ///
    /// A conversion in flight is abandoned; its request is lost.
    pub fn stop(&self) {
        self.regs.set_interrupt(false);
        self.regs.set_enabled(false);
        critical_section::with(|cs| {
            self.started.borrow(cs).set(false);
            self.active.borrow(cs).set(None);
        });
    }

    pub fn is_started(&self) -> bool {
        critical_section::with(|cs| self.started.borrow(cs).get())
    }

    /// Queue a conversion of `channel`
    pub fn request(&self, channel: u8, timeout: Timeout) -> Result<(), ChannelError> {
        self.requests.send(channel, timeout)?;
        if self.is_started() {
            self.kick();
        }
        Ok(())
    }

    /// Take the next result
    pub fn read(&self, timeout: Timeout) -> Result<Sample, ChannelError> {
        self.results.receive(timeout)
    }

    /// Results waiting to be read
    pub fn available(&self) -> usize {
        self.results.len()
    }

    /// Convert one channel and wait for its value
    ///
    /// Assumes no other requests are outstanding; otherwise the first
    /// queued result is returned.
    pub fn convert(&self, channel: u8, timeout: Timeout) -> Result<u16, ChannelError> {
        self.request(channel, timeout)?;
        self.read(timeout).map(|sample| sample.value)
    }

    /// Results discarded because the result queue was full (saturating)
    pub fn dropped_count(&self) -> u8 {
        critical_section::with(|cs| self.dropped.borrow(cs).get())
    }

    /// Start the next queued conversion if the converter is idle
    fn kick(&self) {
        critical_section::with(|cs| {
            let active = self.active.borrow(cs);
            if active.get().is_some() {
                return;
            }
            if let Ok(channel) = self.requests.receive(Timeout::Immediate) {
                active.set(Some(channel));
                self.regs.select_channel(channel);
                self.regs.set_interrupt(true);
                self.regs.start_conversion();
            }
        });
    }

    /// Conversion-complete handler body (interrupt context)
    pub fn on_conversion_complete(&self) -> Woken {
        let value = self.regs.read_result() & ADC_MAX;
        let finished = critical_section::with(|cs| self.active.borrow(cs).take());

        let mut woken = Woken::NONE;
        if let Some(channel) = finished {
            match self.results.send_from_isr(Sample { channel, value }) {
                Ok(w) => woken |= w,
                Err(_) => critical_section::with(|cs| {
                    let d = self.dropped.borrow(cs);
                    d.set(d.get().saturating_add(1));
                }),
            }
        }

        match self.requests.receive_from_isr() {
            Ok((channel, w)) => {
                woken |= w;
                critical_section::with(|cs| self.active.borrow(cs).set(Some(channel)));
                self.regs.select_channel(channel);
                self.regs.start_conversion();
            }
            Err(_) => self.regs.set_interrupt(false),
        }
        woken
    }
}

impl<A, K, const REQ: usize, const RES: usize> InterruptHandler for AdcDriver<A, K, REQ, RES>
where
    A: AdcRegisters + Sync,
    K: Kernel,
{
    fn on_interrupt(&self, epilogue: &mut Epilogue) {
        if self.regs.interrupt_enabled() && !self.regs.converting() {
            epilogue.note(self.on_conversion_complete());
        }
    }
}

impl<A, K, const REQ: usize, const RES: usize> Drop for AdcDriver<A, K, REQ, RES> {
    fn drop(&mut self) {
        if critical_section::with(|cs| self.started.borrow(cs).get()) {
            fatal!("adc: driver dropped while started");
        }
    }
}
