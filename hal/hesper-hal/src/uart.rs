//! UART register abstraction
//!
//! The serial driver is interrupt-driven: it never polls the data register
//! from task context. This trait exposes exactly the register operations
//! the driver's start/stop sequencing and its interrupt handler need.

/// Register-level access to one UART peripheral
///
/// Methods take `&self`: implementations are thin wrappers over
/// memory-mapped registers and are called from both task and interrupt
/// context.
pub trait UartRegisters {
    /// Program baud rate and frame format
    fn configure(&self, config: &UartConfig);

    /// Enable or disable the receiver and transmitter
    fn set_enabled(&self, rx: bool, tx: bool);

    /// Enable or disable the receive-complete interrupt
    fn set_rx_interrupt(&self, enabled: bool);

    /// Enable or disable the data-register-empty interrupt
    fn set_tx_interrupt(&self, enabled: bool);

    /// Whether the data-register-empty interrupt is armed
    fn tx_interrupt_enabled(&self) -> bool;

    /// A received byte is waiting in the data register
    fn rx_ready(&self) -> bool;

    /// The transmit data register can accept a byte
    fn tx_ready(&self) -> bool;

    /// The transmit shift register has drained
    fn tx_complete(&self) -> bool;

    /// Error flags for the byte currently in the data register
    ///
    /// Must be read before [`read_data`](Self::read_data), which clears them.
    fn rx_status(&self) -> RxStatus;

    /// Read the received byte
    fn read_data(&self) -> u8;

    /// Write a byte to the transmit data register
    fn write_data(&self, byte: u8);
}

/// Receive error flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStatus {
    /// Stop bit was not found
    pub framing: bool,
    /// A byte arrived before the previous one was read
    pub overrun: bool,
    /// Parity check failed
    pub parity: bool,
}

impl RxStatus {
    /// Check if any error flag is set
    pub fn is_error(&self) -> bool {
        self.framing || self.overrun || self.parity
    }
}

/// UART configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of data bits (typically 8)
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
    /// Double-speed asynchronous mode (halves the baud divisor)
    pub double_speed: bool,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baudrate: 38400,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            double_speed: true,
        }
    }
}

impl UartConfig {
    /// Baud rate register value for a given CPU clock
    ///
    /// Rounds to the nearest divisor.
    pub fn divisor(&self, cpu_hz: u32) -> u16 {
        let scale: u32 = if self.double_speed { 8 } else { 16 };
        let denom = scale * self.baudrate.max(1);
        let ubrr = (cpu_hz + denom / 2) / denom;
        ubrr.saturating_sub(1).min(u16::MAX as u32) as u16
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    One,
    Two,
}
