//! Change notification.
//!
//! While a session is listening, every committed write to the GPIOD output
//! data register is diffed bit-by-bit against the previous committed value:
//! `+D<n>` for a low-to-high transition, `-D<n>` for high-to-low, with the
//! bit index in decimal. Each line is queued whole, so the transport never
//! splits a notification across writes.
//!
//! The watch only ever compares against the immediately preceding committed
//! value, never an older snapshot, and a write that leaves the value
//! unchanged produces nothing.

use std::collections::VecDeque;

/// Last-observed ODR value for one session.
pub struct OdrWatch {
    last: u32,
}

impl OdrWatch {
    pub fn new(initial: u32) -> Self {
        OdrWatch { last: initial }
    }

    /// Forget history and adopt `value` as the baseline. Used on reset so
    /// the reset transition itself reports nothing.
    pub fn reseed(&mut self, value: u32) {
        self.last = value;
    }

    /// Record a committed value without emitting (session not listening).
    pub fn track(&mut self, value: u32) {
        self.last = value;
    }

    /// Record a committed value, appending one notification line per bit
    /// transition, in bit-index order.
    pub fn observe(&mut self, value: u32, out: &mut VecDeque<String>) {
        let changed = self.last ^ value;
        if changed != 0 {
            for n in 0..32 {
                if changed & (1 << n) == 0 {
                    continue;
                }
                if value & (1 << n) != 0 {
                    out.push_back(format!("+D{}", n));
                } else {
                    out.push_back(format!("-D{}", n));
                }
            }
        }
        self.last = value;
    }
}
