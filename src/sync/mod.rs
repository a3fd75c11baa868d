//! Epoch-based reclamation plumbing shared by every module in [`crate::table`].
//!
//! Nothing in this module knows about keys, values, or hashing; it only
//! wraps `crossbeam_epoch` with the ordering conventions the rest of the
//! crate relies on and provides a small bounded-spin helper for the
//! handful of places where waiting is permitted.

pub(crate) mod atm;

use std::{cell::Cell, hint::spin_loop, thread};

/// Exponential backoff: spin a few times, then yield to the scheduler.
///
/// Used by the admission-control spin before allocating a large successor
/// table and by CAS retry loops that lose a race repeatedly under
/// heavy contention. Never blocks indefinitely — the only waiting anywhere
/// in this crate is bounded spinning.
pub(crate) struct Backoff {
    step: Cell<u8>,
}

impl Backoff {
    const MAX_SPIN: u8 = 6;
    const MAX_YIELD: u8 = 10;

    pub(crate) fn new() -> Self {
        Self { step: Cell::new(0) }
    }

    pub(crate) fn spin(&self) {
        if self.step.get() <= Self::MAX_SPIN {
            for _ in 0..1u32 << self.step.get() {
                spin_loop();
            }
        } else {
            thread::yield_now();
        }
        if self.step.get() <= Self::MAX_YIELD {
            self.step.set(self.step.get() + 1);
        }
    }
}
