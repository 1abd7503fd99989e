//! Analog converter register abstraction
//!
//! Single-converter, multiplexed-input ADC with a conversion-complete
//! interrupt.

/// Register-level access to the ADC
pub trait AdcRegisters {
    /// Program voltage reference and clock prescaler
    fn configure(&self, config: &AdcConfig);

    /// Power the converter up or down
    fn set_enabled(&self, enabled: bool);

    /// Enable or disable the conversion-complete interrupt
    fn set_interrupt(&self, enabled: bool);

    /// Whether the conversion-complete interrupt is armed
    fn interrupt_enabled(&self) -> bool;

    /// Route an input channel to the converter
    fn select_channel(&self, channel: u8);

    /// Start a single conversion on the selected channel
    fn start_conversion(&self);

    /// A conversion is in progress
    fn converting(&self) -> bool;

    /// Read the 10-bit result of the last conversion
    fn read_result(&self) -> u16;
}

/// ADC configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcConfig {
    /// Voltage reference
    pub reference: Reference,
    /// ADC clock prescaler
    pub prescaler: Prescaler,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            reference: Reference::Avcc,
            prescaler: Prescaler::Div128, // 125 kHz at 16 MHz
        }
    }
}

/// Voltage reference selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reference {
    /// External AREF pin
    Aref,
    /// Supply voltage
    Avcc,
    /// Internal 1.1 V bandgap
    Internal1V1,
    /// Internal 2.56 V reference
    Internal2V56,
}

/// ADC clock prescaler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    Div2,
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
}

impl Prescaler {
    /// Divider value
    pub fn divisor(self) -> u8 {
        match self {
            Prescaler::Div2 => 2,
            Prescaler::Div4 => 4,
            Prescaler::Div8 => 8,
            Prescaler::Div16 => 16,
            Prescaler::Div32 => 32,
            Prescaler::Div64 => 64,
            Prescaler::Div128 => 128,
        }
    }
}

/// Maximum value of a conversion result
pub const ADC_MAX: u16 = 0x03FF;
