//! Bounded interrupt-safe channel
//!
//! A fixed-capacity FIFO shared between interrupt and task context. The
//! buffer lives inside a critical section, so both sides may touch it, but
//! each side must use its own set of operations:
//!
//! - Task context: [`Channel::send`], [`Channel::receive`], [`Channel::peek`]
//!   block for up to a [`Timeout`] while the channel is full or empty.
//! - Interrupt context: [`Channel::send_from_isr`],
//!   [`Channel::receive_from_isr`] never block and report whether a blocked
//!   task became runnable.
//!
//! A blocked task registers itself as a waiting sender or receiver and
//! re-checks once per tick. An interrupt-side operation that succeeds while
//! a task of the opposite direction is registered reports [`Woken::TASK`].

use core::cell::RefCell;
use core::marker::PhantomData;

use critical_section::Mutex;
use heapless::Deque;
use hesper_hal::kernel::{Kernel, Timeout};

use crate::isr::Woken;

/// Channel operation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelError {
    /// No space for the item before the timeout
    Full,
    /// No item arrived before the timeout
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Sender,
    Receiver,
}

struct State<T, const N: usize> {
    queue: Deque<T, N>,
    blocked_senders: u8,
    blocked_receivers: u8,
}

impl<T, const N: usize> State<T, N> {
    fn block(&mut self, side: Side) {
        match side {
            Side::Sender => self.blocked_senders = self.blocked_senders.saturating_add(1),
            Side::Receiver => self.blocked_receivers = self.blocked_receivers.saturating_add(1),
        }
    }

    fn unblock(&mut self, side: Side) {
        match side {
            Side::Sender => self.blocked_senders = self.blocked_senders.saturating_sub(1),
            Side::Receiver => self.blocked_receivers = self.blocked_receivers.saturating_sub(1),
        }
    }
}

/// Bounded FIFO of `N` items of type `T`
///
/// `K` is the scheduler used for blocking waits.
pub struct Channel<T, const N: usize, K> {
    state: Mutex<RefCell<State<T, N>>>,
    _kernel: PhantomData<fn() -> K>,
}

impl<T, const N: usize, K: Kernel> Default for Channel<T, N, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize, K: Kernel> Channel<T, N, K> {
    /// Create an empty channel
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                queue: Deque::new(),
                blocked_senders: 0,
                blocked_receivers: 0,
            })),
            _kernel: PhantomData,
        }
    }

    /// Fixed capacity
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.len())
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.is_empty())
    }

    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.is_full())
    }

    /// Drop every buffered item (task context)
    pub fn clear(&self) {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).queue.clear());
    }

    /// Append an item, blocking while the channel is full (task context)
    pub fn send(&self, item: T, timeout: Timeout) -> Result<(), ChannelError> {
        let mut slot = Some(item);
        self.wait(timeout, Side::Sender, |state| {
            let item = slot.take()?;
            match state.queue.push_back(item) {
                Ok(()) => Some(()),
                Err(item) => {
                    slot = Some(item);
                    None
                }
            }
        })
        .ok_or(ChannelError::Full)
    }

    /// Remove the oldest item, blocking while the channel is empty (task context)
    pub fn receive(&self, timeout: Timeout) -> Result<T, ChannelError> {
        self.wait(timeout, Side::Receiver, |state| state.queue.pop_front())
            .ok_or(ChannelError::Empty)
    }

    /// Copy the oldest item without removing it (task context)
    pub fn peek(&self, timeout: Timeout) -> Result<T, ChannelError>
    where
        T: Clone,
    {
        self.wait(timeout, Side::Receiver, |state| state.queue.front().cloned())
            .ok_or(ChannelError::Empty)
    }

    /// Append an item without blocking (interrupt context)
    pub fn send_from_isr(&self, item: T) -> Result<Woken, ChannelError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state
                .queue
                .push_back(item)
                .map_err(|_| ChannelError::Full)?;
            Ok(Woken::new(state.blocked_receivers > 0))
        })
    }

    /// Remove the oldest item without blocking (interrupt context)
    pub fn receive_from_isr(&self) -> Result<(T, Woken), ChannelError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let item = state.queue.pop_front().ok_or(ChannelError::Empty)?;
            Ok((item, Woken::new(state.blocked_senders > 0)))
        })
    }

    /// Copy the oldest item without removing it (interrupt context)
    pub fn peek_from_isr(&self) -> Result<T, ChannelError>
    where
        T: Clone,
    {
        critical_section::with(|cs| {
            self.state
                .borrow_ref(cs)
                .queue
                .front()
                .cloned()
                .ok_or(ChannelError::Empty)
        })
    }

    /// Retry `attempt` once per tick until it succeeds or the timeout expires
    ///
    /// The caller stays registered as a blocked `side` between attempts.
    fn wait<R>(
        &self,
        timeout: Timeout,
        side: Side,
        mut attempt: impl FnMut(&mut State<T, N>) -> Option<R>,
    ) -> Option<R> {
        let deadline = timeout.start::<K>();
        let mut registered = false;

        loop {
            let (outcome, done) = critical_section::with(|cs| {
                let mut state = self.state.borrow_ref_mut(cs);
                let outcome = attempt(&mut state);
                let done = outcome.is_some() || deadline.expired::<K>();
                if done && registered {
                    state.unblock(side);
                } else if !done && !registered {
                    state.block(side);
                }
                (outcome, done)
            });

            if done {
                return outcome;
            }
            registered = true;
            K::delay(1);
        }
    }

    #[cfg(test)]
    fn blocked(&self) -> (u8, u8) {
        critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            (state.blocked_senders, state.blocked_receivers)
        })
    }
}
