//! Host-side scheduler stand-in for unit tests
//!
//! Ticks are thread-local so tests running in parallel do not share a
//! clock. `delay` advances the clock and then runs an optional hook, which
//! tests use to play the part of an interrupt firing while a task is
//! blocked.

use core::cell::{Cell, RefCell};
use std::boxed::Box;

use hesper_hal::kernel::{Kernel, Ticks};

std::thread_local! {
    static TICKS: Cell<Ticks> = const { Cell::new(0) };
    static YIELDS: Cell<u32> = const { Cell::new(0) };
    static ON_DELAY: RefCell<Option<Box<dyn FnMut()>>> = const { RefCell::new(None) };
}

pub struct MockKernel;

impl Kernel for MockKernel {
    const TICK_HZ: u32 = 1000;

    fn now() -> Ticks {
        TICKS.with(|t| t.get())
    }

    fn delay(ticks: Ticks) {
        TICKS.with(|t| t.set(t.get().wrapping_add(ticks)));
        let hook = ON_DELAY.with(|h| h.borrow_mut().take());
        if let Some(mut hook) = hook {
            hook();
            ON_DELAY.with(|h| {
                let mut slot = h.borrow_mut();
                if slot.is_none() {
                    *slot = Some(hook);
                }
            });
        }
    }

    fn yield_from_isr() {
        YIELDS.with(|y| y.set(y.get() + 1));
    }
}

/// Run `hook` every time a task delays
pub fn on_delay(hook: impl FnMut() + 'static) {
    ON_DELAY.with(|h| *h.borrow_mut() = Some(Box::new(hook)));
}

pub fn clear_hook() {
    ON_DELAY.with(|h| *h.borrow_mut() = None);
}

pub fn yields() -> u32 {
    YIELDS.with(|y| y.get())
}
