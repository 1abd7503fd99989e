//! SPI register abstraction
//!
//! Master-mode register operations used by the interrupt-driven SPI
//! driver. One transfer-complete interrupt fires per byte shifted.

/// Register-level access to one SPI master peripheral
pub trait SpiRegisters {
    /// Program clock rate, mode and bit order, select master mode
    fn configure(&self, config: &SpiConfig);

    /// Enable or disable the peripheral
    fn set_enabled(&self, enabled: bool);

    /// Enable or disable the transfer-complete interrupt
    fn set_interrupt(&self, enabled: bool);

    /// Whether the transfer-complete interrupt is armed
    fn interrupt_enabled(&self) -> bool;

    /// A byte transfer has finished
    fn transfer_complete(&self) -> bool;

    /// The data register was written during a transfer
    fn write_collision(&self) -> bool;

    /// Read the byte shifted in by the last transfer
    fn read_data(&self) -> u8;

    /// Write a byte, starting a transfer
    fn write_data(&self, byte: u8);
}

/// SPI configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
    /// Clock polarity
    pub polarity: Polarity,
    /// Clock phase
    pub phase: Phase,
    /// Bit order on the wire
    pub bit_order: BitOrder,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            frequency: 4_000_000, // 4 MHz, F_CPU/4 on a 16 MHz part
            polarity: Polarity::IdleLow,
            phase: Phase::CaptureOnFirstTransition,
            bit_order: BitOrder::MsbFirst,
        }
    }
}

impl SpiConfig {
    /// Configuration for a given SPI mode
    pub fn with_mode(mode: Mode) -> Self {
        let (polarity, phase) = mode.into();
        Self {
            polarity,
            phase,
            ..Self::default()
        }
    }

    /// Smallest power-of-two clock divider (2..=128) not exceeding `frequency`
    pub fn divider(&self, cpu_hz: u32) -> u8 {
        let mut div: u32 = 2;
        while div < 128 && cpu_hz / div > self.frequency {
            div *= 2;
        }
        div as u8
    }
}

/// SPI clock polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Clock idles low (CPOL=0)
    IdleLow,
    /// Clock idles high (CPOL=1)
    IdleHigh,
}

/// SPI clock phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Data captured on first clock transition (CPHA=0)
    CaptureOnFirstTransition,
    /// Data captured on second clock transition (CPHA=1)
    CaptureOnSecondTransition,
}

/// Bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// SPI mode (combined polarity and phase)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Mode 0: CPOL=0, CPHA=0
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl From<Mode> for (Polarity, Phase) {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mode0 => (Polarity::IdleLow, Phase::CaptureOnFirstTransition),
            Mode::Mode1 => (Polarity::IdleLow, Phase::CaptureOnSecondTransition),
            Mode::Mode2 => (Polarity::IdleHigh, Phase::CaptureOnFirstTransition),
            Mode::Mode3 => (Polarity::IdleHigh, Phase::CaptureOnSecondTransition),
        }
    }
}
