//! Interrupt owner registry
//!
//! An interrupt vector is a free function; the driver that services it is an
//! object. A [`Registry`] maps a controller or channel number to the driver
//! instance that currently owns that vector. Drivers are registered when the
//! board brings them up and unregistered when they are torn down; the vector
//! trampoline calls [`Registry::dispatch`].
//!
//! ```ignore
//! static UARTS: Registry<2> = Registry::new();
//!
//! UARTS.register(0, SERIAL0.init(SerialDriver::new(Usart0, 0xFF)));
//!
//! #[interrupt]
//! fn USART0_RX() {
//!     UARTS.dispatch::<Rtos>(0);
//! }
//! ```

use core::cell::RefCell;

use critical_section::Mutex;
use hesper_hal::kernel::Kernel;

use crate::isr::Epilogue;

/// A driver that services an interrupt vector
pub trait InterruptHandler: Sync {
    /// Service the pending interrupt
    ///
    /// Runs in interrupt context: must not block. Record every [`Woken`]
    /// result in `epilogue`.
    ///
    /// [`Woken`]: crate::isr::Woken
    fn on_interrupt(&self, epilogue: &mut Epilogue);
}

/// Registry errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// Index beyond the registry size
    OutOfRange,
    /// Another driver already owns this index
    Occupied,
}

/// Fixed table of interrupt owners indexed by controller number
pub struct Registry<const N: usize> {
    slots: Mutex<RefCell<[Option<&'static dyn InterruptHandler>; N]>>,
}

impl<const N: usize> Default for Registry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Registry<N> {
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new([None; N])),
        }
    }

    /// Claim `index` for `handler`
    pub fn try_register(
        &self,
        index: usize,
        handler: &'static dyn InterruptHandler,
    ) -> Result<(), RegistryError> {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            let slot = slots.get_mut(index).ok_or(RegistryError::OutOfRange)?;
            if slot.is_some() {
                return Err(RegistryError::Occupied);
            }
            *slot = Some(handler);
            Ok(())
        })
    }

    /// Claim `index` for `handler`, halting if it cannot be claimed
    ///
    /// Two drivers owning one vector would let an interrupt reach an object
    /// that does not expect it.
    pub fn register(&self, index: usize, handler: &'static dyn InterruptHandler) {
        if let Err(e) = self.try_register(index, handler) {
            fatal!("interrupt registry: cannot claim slot {}: {:?}", index, e);
        }
        debug!("interrupt registry: slot {} claimed", index);
    }

    /// Release `index`, returning the previous owner
    pub fn unregister(&self, index: usize) -> Option<&'static dyn InterruptHandler> {
        critical_section::with(|cs| {
            self.slots
                .borrow_ref_mut(cs)
                .get_mut(index)
                .and_then(|slot| slot.take())
        })
    }

    /// Check whether `index` has an owner
    pub fn is_registered(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Current owner of `index`
    pub fn get(&self, index: usize) -> Option<&'static dyn InterruptHandler> {
        critical_section::with(|cs| self.slots.borrow_ref(cs).get(index).copied().flatten())
    }

    /// Forward an interrupt to the owner of `index` and run the epilogue
    ///
    /// Returns whether a context switch was requested. An empty slot means
    /// a vector is armed with no driver behind it, which is fatal.
    pub fn dispatch<K: Kernel>(&self, index: usize) -> bool {
        let Some(handler) = self.get(index) else {
            fatal!("interrupt registry: no owner for slot {}", index);
        };
        let mut epilogue = Epilogue::new();
        handler.on_interrupt(&mut epilogue);
        epilogue.finish::<K>()
    }
}
