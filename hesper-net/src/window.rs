//! Socket buffer addressing
//!
//! Each socket owns a power-of-two slice of the chip's TX memory and one of
//! its RX memory. The chip tracks a 16-bit logical pointer per direction
//! that only ever increases (and wraps at 2^16); the physical address of
//! logical position `p` is `base + (p & (size - 1))`.
//!
//! A run of bytes that crosses the end of the slice is split in two:
//!
//! ```text
//!  base                          base + size
//!   ┌──────────────┬──────────────┬───────┐
//!   │ second part  │              │ first │
//!   └──────────────┴──────────────┴───────┘
//!                                 ▲
//!                          base + (p & mask)
//! ```

use crate::regs::{BUFFER_MEMORY_SIZE, MAX_SOCKETS, RX_BASE, TX_BASE};

/// One contiguous piece of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Span {
    /// Physical chip address
    pub addr: u16,
    /// Offset into the caller's buffer
    pub offset: usize,
    /// Number of bytes
    pub len: usize,
}

/// One socket's slice of TX or RX memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Window {
    base: u16,
    size: u16,
}

impl Window {
    /// Create a window
    ///
    /// `size` must be a power of two.
    pub const fn new(base: u16, size: u16) -> Self {
        debug_assert!(size.is_power_of_two());
        Self { base, size }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn mask(&self) -> u16 {
        self.size - 1
    }

    /// Physical address of a logical pointer
    pub fn physical(&self, logical: u16) -> u16 {
        self.base + (logical & self.mask())
    }

    /// Split a run of `len` bytes at logical position `logical`
    ///
    /// Returns the part at the tail of the window and, if the run wraps,
    /// the remainder at the start of the window. `len` is clamped to the
    /// window size.
    pub fn split(&self, logical: u16, len: usize) -> (Span, Option<Span>) {
        let len = len.min(self.size as usize);
        let offset = (logical & self.mask()) as usize;
        let size1 = self.size as usize - offset;

        if size1 >= len {
            let whole = Span {
                addr: self.base + offset as u16,
                offset: 0,
                len,
            };
            (whole, None)
        } else {
            let tail = Span {
                addr: self.base + offset as u16,
                offset: 0,
                len: size1,
            };
            let head = Span {
                addr: self.base,
                offset: size1,
                len: len - size1,
            };
            (tail, Some(head))
        }
    }
}

/// Split of the 8 KiB TX and RX memories between sockets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryLayout {
    sockets: u8,
    size: u16,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::even(MAX_SOCKETS)
    }
}

impl MemoryLayout {
    /// Divide memory evenly between `sockets` sockets (1, 2 or 4)
    ///
    /// Other counts round up to the next supported division.
    pub const fn even(sockets: u8) -> Self {
        let sockets = match sockets {
            0 | 1 => 1,
            2 => 2,
            _ => 4,
        };
        Self {
            sockets,
            size: BUFFER_MEMORY_SIZE / sockets as u16,
        }
    }

    /// Number of sockets that have memory
    pub fn sockets(&self) -> u8 {
        self.sockets
    }

    /// Per-socket buffer size in each direction
    pub fn socket_size(&self) -> u16 {
        self.size
    }

    /// RMSR/TMSR value: two bits per socket, 1/2/4/8 KiB
    ///
    /// Sockets beyond the configured count get no memory bits; the chip
    /// ignores them once the 8 KiB is used up.
    pub fn size_register(&self) -> u8 {
        let code = match self.size {
            0x0400 => 0b00,
            0x0800 => 0b01,
            0x1000 => 0b10,
            _ => 0b11,
        };
        let mut value = 0u8;
        for s in 0..self.sockets {
            value |= code << (2 * s);
        }
        value
    }

    /// TX window of a socket
    pub fn tx(&self, socket: u8) -> Window {
        Window::new(TX_BASE + socket as u16 * self.size, self.size)
    }

    /// RX window of a socket
    pub fn rx(&self, socket: u8) -> Window {
        Window::new(RX_BASE + socket as u16 * self.size, self.size)
    }
}
