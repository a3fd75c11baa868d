//! The trailing metadata block attached to a table: everything besides the
//! slot array itself.

use crate::{counter::ScalableCounter, sync::atm::Atomic};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

pub(crate) struct TableRecord<K, V> {
    /// Live-entry count, shared across the whole table chain — a
    /// successor starts from the same `Arc` rather than its own counter.
    pub(crate) size_counter: Arc<ScalableCounter>,
    /// Claimed-slot count for this table only; fresh on every resize.
    pub(crate) slots_counter: ScalableCounter,
    /// Set exactly once, via CAS, to this table's successor.
    pub(crate) next_table: Atomic<super::Table<K, V>>,
    /// Monotonically increasing chunk-claim cursor for migration.
    pub(crate) claimed_chunk: AtomicUsize,
    /// Monotonically increasing count of slots copied into the successor.
    pub(crate) copy_done: AtomicUsize,
    /// Threads currently attempting to allocate a successor (admission
    /// control).
    pub(crate) resizers: AtomicUsize,
    /// When this table was promoted to top (or created, for the first
    /// table). Feeds the churn heuristic in `desired_len`.
    pub(crate) promoted_at: Instant,
}

impl<K, V> TableRecord<K, V> {
    pub(crate) fn fresh(size_counter: Arc<ScalableCounter>, max_cells: usize) -> Self {
        Self {
            size_counter,
            slots_counter: ScalableCounter::new(max_cells),
            next_table: Atomic::null(),
            claimed_chunk: AtomicUsize::new(0),
            copy_done: AtomicUsize::new(0),
            resizers: AtomicUsize::new(0),
            promoted_at: Instant::now(),
        }
    }

    #[inline(always)]
    pub(crate) fn slots_used(&self) -> i64 {
        self.slots_counter.value()
    }

    #[inline(always)]
    pub(crate) fn copy_done(&self) -> usize {
        self.copy_done.load(Ordering::Acquire)
    }
}
