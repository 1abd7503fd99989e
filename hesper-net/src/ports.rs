//! Ephemeral port allocation
//!
//! Sockets bound without an explicit port get one from a process-wide
//! allocator. The allocator keeps a rotating candidate, starting just above
//! the well-known range, and a small table of ports currently bound by any
//! socket. Every access happens inside a critical section.

use core::cell::RefCell;

use critical_section::Mutex;

/// First ephemeral port, just above the well-known range
pub const EPHEMERAL_START: u16 = 1024;

/// Number of bound ports the table can track
pub const PORT_TABLE_SIZE: usize = 8;

/// Process-wide allocator used by the socket layer
pub static EPHEMERAL_PORTS: PortAllocator = PortAllocator::new();

struct PortTable {
    next: u16,
    /// Bound ports, zero marks a free entry
    bound: [u16; PORT_TABLE_SIZE],
}

impl PortTable {
    fn contains(&self, port: u16) -> bool {
        self.bound.contains(&port)
    }

    fn insert(&mut self, port: u16) -> bool {
        match self.bound.iter_mut().find(|p| **p == 0) {
            Some(entry) => {
                *entry = port;
                true
            }
            None => false,
        }
    }

    fn advance(&mut self) -> u16 {
        let candidate = self.next;
        self.next = match self.next.wrapping_add(1) {
            p if p < EPHEMERAL_START => EPHEMERAL_START,
            p => p,
        };
        candidate
    }
}

/// Critical-section-guarded port table
pub struct PortAllocator {
    table: Mutex<RefCell<PortTable>>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    pub const fn new() -> Self {
        Self::starting_at(EPHEMERAL_START)
    }

    /// Allocator whose first candidate is `port`
    ///
    /// Values inside the well-known range start at [`EPHEMERAL_START`].
    pub const fn starting_at(port: u16) -> Self {
        let next = if port < EPHEMERAL_START {
            EPHEMERAL_START
        } else {
            port
        };
        Self {
            table: Mutex::new(RefCell::new(PortTable {
                next,
                bound: [0; PORT_TABLE_SIZE],
            })),
        }
    }

    /// Pick and record a free ephemeral port
    ///
    /// Returns `None` only when the table is full. At most
    /// `PORT_TABLE_SIZE + 1` candidates are examined: with at most
    /// `PORT_TABLE_SIZE` ports bound, one of them is free.
    pub fn allocate(&self) -> Option<u16> {
        critical_section::with(|cs| {
            let mut table = self.table.borrow_ref_mut(cs);
            if !table.bound.contains(&0) {
                return None;
            }
            for _ in 0..=PORT_TABLE_SIZE {
                let candidate = table.advance();
                if !table.contains(candidate) {
                    table.insert(candidate);
                    return Some(candidate);
                }
            }
            None
        })
    }

    /// Record an explicitly bound port
    ///
    /// A port may be recorded more than once (several listening sockets
    /// can share a server port). Returns false if the table is full.
    pub fn reserve(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        critical_section::with(|cs| self.table.borrow_ref_mut(cs).insert(port))
    }

    /// Forget one binding of `port`
    pub fn release(&self, port: u16) {
        if port == 0 {
            return;
        }
        critical_section::with(|cs| {
            let mut table = self.table.borrow_ref_mut(cs);
            if let Some(entry) = table.bound.iter_mut().find(|p| **p == port) {
                *entry = 0;
            }
        })
    }

    /// Check whether any socket has `port` bound
    pub fn is_bound(&self, port: u16) -> bool {
        port != 0 && critical_section::with(|cs| self.table.borrow_ref(cs).contains(port))
    }

    /// Number of recorded bindings
    pub fn bound_count(&self) -> usize {
        critical_section::with(|cs| {
            self.table
                .borrow_ref(cs)
                .bound
                .iter()
                .filter(|p| **p != 0)
                .count()
        })
    }
}
