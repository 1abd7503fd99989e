//! Scheduler substrate
//!
//! The drivers never own a scheduler. They call into one through the
//! [`Kernel`] trait, which a board port implements on top of whatever
//! preemptive RTOS it runs (tick interrupt, task delay, the "switch context
//! on interrupt return" request).

/// Scheduler tick count
pub type Ticks = u32;

/// Services consumed from the real-time scheduler
///
/// The scheduler is a process-wide singleton, so every operation is an
/// associated function rather than a method.
pub trait Kernel {
    /// Tick interrupt frequency
    const TICK_HZ: u32;

    /// Current tick count (wraps)
    fn now() -> Ticks;

    /// Block the calling task for at least `ticks` ticks
    ///
    /// A delay of zero yields to other ready tasks of equal priority.
    fn delay(ticks: Ticks);

    /// Request a context switch on return from the current interrupt
    fn yield_from_isr();

    /// Convert milliseconds to ticks, rounding up
    fn millis_to_ticks(ms: u32) -> Ticks {
        let ticks = (ms as u64 * Self::TICK_HZ as u64).div_ceil(1000);
        ticks.min(Ticks::MAX as u64) as Ticks
    }
}

/// Task-blocking recursive mutex provided by the scheduler
///
/// Waiters sleep instead of masking interrupts, so the holder may wait on
/// an interrupt-driven peripheral. The task that holds the mutex may
/// acquire it again; it is free once every `acquire` has been matched by a
/// `release`.
pub trait TaskMutex {
    /// Unlocked mutex, usable in `static` initializers
    const INIT: Self;

    /// Block the calling task until the mutex is free or already its own
    fn acquire(&self);

    /// Undo one `acquire` by the owning task
    fn release(&self);
}

/// How long a task-context operation may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Check once and return
    Immediate,
    /// Block for at most this many ticks
    Ticks(Ticks),
    /// Block until the operation succeeds
    Forever,
}

impl Timeout {
    /// Timeout expressed in milliseconds
    pub fn from_millis<K: Kernel>(ms: u32) -> Self {
        match K::millis_to_ticks(ms) {
            0 => Timeout::Immediate,
            ticks => Timeout::Ticks(ticks),
        }
    }

    /// Start counting this timeout from the current tick
    pub fn start<K: Kernel>(self) -> Deadline {
        Deadline {
            start: K::now(),
            timeout: self,
        }
    }
}

impl From<Ticks> for Timeout {
    fn from(ticks: Ticks) -> Self {
        match ticks {
            0 => Timeout::Immediate,
            Ticks::MAX => Timeout::Forever,
            t => Timeout::Ticks(t),
        }
    }
}

/// A timeout anchored at the tick it started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    start: Ticks,
    timeout: Timeout,
}

impl Deadline {
    /// Check whether the deadline has passed
    ///
    /// `Immediate` is always expired, so a loop that checks its condition
    /// before calling this performs exactly one attempt.
    pub fn expired<K: Kernel>(&self) -> bool {
        match self.timeout {
            Timeout::Immediate => true,
            Timeout::Ticks(limit) => K::now().wrapping_sub(self.start) >= limit,
            Timeout::Forever => false,
        }
    }

    /// Ticks left before expiry, `None` for `Forever`
    pub fn remaining<K: Kernel>(&self) -> Option<Ticks> {
        match self.timeout {
            Timeout::Immediate => Some(0),
            Timeout::Ticks(limit) => Some(limit.saturating_sub(K::now().wrapping_sub(self.start))),
            Timeout::Forever => None,
        }
    }
}
