//! SPI register client
//!
//! The W5100 moves one byte per SPI frame:
//!
//! ```text
//! write: CS↓ 0xF0 addrHi addrLo data CS↑
//! read:  CS↓ 0x0F addrHi addrLo 0x00 CS↑   (data in the 4th byte shifted in)
//! ```
//!
//! A block access is a run of frames at consecutive addresses. The bus
//! mutex is taken once per block, so a 16-bit counter or a buffer copy is
//! never interleaved with another task's frames.
//!
//! The mutex is held while the SPI bus waits for each byte. When the bus is
//! the interrupt-driven [`SpiDriver`](crate::spi::SpiDriver), guard it with
//! [`TaskRawMutex`] over the scheduler's mutex. A `CriticalSectionRawMutex`
//! masks the transfer-complete interrupt for the whole access and the
//! exchange never finishes.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use hesper_hal::kernel::TaskMutex;
use hesper_net::regs::{OP_READ, OP_WRITE};

use super::RegisterAccess;

/// Bus client errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError<S, P> {
    /// SPI transfer failed
    Spi(S),
    /// Chip-select pin could not be driven
    Pin(P),
}

/// [`RawMutex`] backed by the scheduler's task-blocking mutex
///
/// Interrupts stay enabled while it is held.
pub struct TaskRawMutex<M>(M);

/// Undoes one acquire, also when the locked closure unwinds
struct Release<'a, M: TaskMutex>(&'a M);

impl<M: TaskMutex> Drop for Release<'_, M> {
    fn drop(&mut self) {
        self.0.release();
    }
}

// SAFETY: a `TaskMutex` keeps every other task out until its owner has
// released it, which is the exclusion `RawMutex` requires.
#[allow(unsafe_code)]
unsafe impl<M: TaskMutex> RawMutex for TaskRawMutex<M> {
    const INIT: Self = TaskRawMutex(M::INIT);

    fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
        self.0.acquire();
        let _release = Release(&self.0);
        f()
    }
}

/// Bus client locked by the scheduler's mutex
pub type TaskBusClient<M, SPI, CS> = BusClient<TaskRawMutex<M>, SPI, CS>;

/// W5100 register access over a shared SPI bus
pub struct BusClient<R: RawMutex, SPI, CS> {
    bus: Mutex<R, RefCell<(SPI, CS)>>,
}

impl<R, SPI, CS> BusClient<R, SPI, CS>
where
    R: RawMutex,
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    /// Take ownership of the bus and the chip's select line
    ///
    /// `cs` should already be driven high.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self {
            bus: Mutex::new(RefCell::new((spi, cs))),
        }
    }

    /// Give the bus and pin back
    pub fn release(self) -> (SPI, CS) {
        self.bus.into_inner().into_inner()
    }

    /// Run `f` with the bus locked
    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut SPI, &mut CS) -> Result<T, BusError<SPI::Error, CS::Error>>,
    ) -> Result<T, BusError<SPI::Error, CS::Error>> {
        self.bus.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let (spi, cs) = &mut *guard;
            f(spi, cs)
        })
    }
}

/// One framed byte access, returning the byte shifted in last
fn frame<SPI, CS>(
    spi: &mut SPI,
    cs: &mut CS,
    op: u8,
    addr: u16,
    data: u8,
) -> Result<u8, BusError<SPI::Error, CS::Error>>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    let [hi, lo] = addr.to_be_bytes();
    let mut words = [op, hi, lo, data];

    cs.set_low().map_err(BusError::Pin)?;
    let result = spi
        .transfer_in_place(&mut words)
        .and_then(|()| spi.flush())
        .map_err(BusError::Spi);
    // Deselect even if the transfer failed
    let deselect = cs.set_high().map_err(BusError::Pin);
    result?;
    deselect?;

    Ok(words[3])
}

impl<R, SPI, CS> RegisterAccess for BusClient<R, SPI, CS>
where
    R: RawMutex,
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    type Error = BusError<SPI::Error, CS::Error>;

    fn read(&self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.transaction(|spi, cs| {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = frame(spi, cs, OP_READ, addr.wrapping_add(i as u16), 0x00)?;
            }
            Ok(())
        })
    }

    fn write(&self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        self.transaction(|spi, cs| {
            for (i, &byte) in data.iter().enumerate() {
                frame(spi, cs, OP_WRITE, addr.wrapping_add(i as u16), byte)?;
            }
            Ok(())
        })
    }
}
