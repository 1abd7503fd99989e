//! Interrupt epilogue protocol
//!
//! The scheduler does not reschedule on its own when an interrupt returns.
//! Every interrupt-side channel operation therefore reports whether it made
//! a blocked task runnable, and the handler must ask for a context switch
//! before returning if any of them did.

use core::ops::{BitOr, BitOrAssign};

use hesper_hal::kernel::Kernel;

/// Whether an interrupt-side operation made a blocked task runnable
#[must_use = "a woken task is only scheduled if the epilogue requests it"]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Woken(bool);

impl Woken {
    /// No task was woken
    pub const NONE: Self = Self(false);

    /// A task was woken
    pub const TASK: Self = Self(true);

    pub fn new(woken: bool) -> Self {
        Self(woken)
    }

    pub fn is_woken(self) -> bool {
        self.0
    }
}

impl BitOr for Woken {
    type Output = Woken;

    fn bitor(self, rhs: Self) -> Self::Output {
        Woken(self.0 || rhs.0)
    }
}

impl BitOrAssign for Woken {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Reschedule request accumulated over one interrupt
///
/// Created at the top of a handler, fed every [`Woken`] the handler
/// receives, and finished on the way out.
#[derive(Debug, Default)]
pub struct Epilogue {
    requested: Woken,
}

impl Epilogue {
    pub const fn new() -> Self {
        Self {
            requested: Woken::NONE,
        }
    }

    /// Record the outcome of an interrupt-side operation
    pub fn note(&mut self, woken: Woken) {
        self.requested |= woken;
    }

    /// Whether a context switch will be requested
    pub fn requested(&self) -> bool {
        self.requested.is_woken()
    }

    /// Ask the scheduler to switch context if any task was woken
    ///
    /// Returns whether a switch was requested.
    pub fn finish<K: Kernel>(self) -> bool {
        let requested = self.requested.is_woken();
        if requested {
            K::yield_from_isr();
        }
        requested
    }
}

/// Run an interrupt handler body and perform its epilogue
pub fn handle<K: Kernel>(body: impl FnOnce(&mut Epilogue)) -> bool {
    let mut epilogue = Epilogue::new();
    body(&mut epilogue);
    epilogue.finish::<K>()
}
