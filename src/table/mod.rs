//! The single open-addressed hash array and everything hung off it: slot
//! layout, operations, migration, and the snapshot iterator. This module
//! is their shared home because they all operate on the same
//! `Table<K, V>`.

pub mod hash;
pub(crate) mod iter;
pub(crate) mod migrate;
pub(crate) mod ops;
pub(crate) mod record;
pub(crate) mod slot;

use crate::{
    counter::ScalableCounter,
    sync::atm::{unprotected, Guard, Shared},
};
use record::TableRecord;
use slot::Slot;
use std::sync::Arc;

/// Minimum table length.
pub(crate) const MIN_SIZE: usize = 8;
/// Largest table length this crate will allocate.
pub(crate) const MAX_SIZE: usize = 1 << 30;
/// Above this target size the churn heuristic clamps growth.
pub(crate) const MAX_CHURN_SIZE: usize = 1 << 15;
/// Slots per migration chunk in release builds.
#[cfg(not(debug_assertions))]
pub(crate) const CHUNK_SIZE: usize = 1024;
/// Slots per migration chunk in debug builds, small enough that tests can
/// exercise multi-chunk migrations without allocating huge tables.
#[cfg(debug_assertions)]
pub(crate) const CHUNK_SIZE: usize = 16;
/// Target wall-clock gap between resizes before the churn heuristic kicks
/// in.
pub(crate) const RESIZE_MILLIS_TARGET: u64 = 1000;
/// A table is "crowded" once `slots_used > (length >> 2) * 3`, i.e.
/// strictly more than 75% full (see `DESIGN.md` for why this exact
/// expression was chosen).
#[inline(always)]
pub(crate) fn is_crowded(slots_used: i64, len: usize) -> bool {
    slots_used > ((len >> 2) * 3) as i64
}

pub(crate) struct Table<K, V> {
    pub(crate) slots: Box<[Slot<K, V>]>,
    pub(crate) len_mask: usize,
    pub(crate) record: TableRecord<K, V>,
}

impl<K, V> Table<K, V> {
    /// Infallible allocation, for call sites that have nowhere to report a
    /// failure (a resize already in flight aborts the process on OOM the
    /// same way any other `Box`/`Vec` allocation in this crate would).
    pub(crate) fn new(capacity: usize, size_counter: Arc<ScalableCounter>, max_cells: usize) -> Self {
        Self::try_new(capacity, size_counter, max_cells)
            .unwrap_or_else(|_| panic!("allocation failed for a table of length {capacity}"))
    }

    /// Fallible allocation, for constructor paths that can still surface a
    /// `MapError` to a caller instead of aborting.
    pub(crate) fn try_new(
        capacity: usize,
        size_counter: Arc<ScalableCounter>,
        max_cells: usize,
    ) -> Result<Self, ()> {
        let len = capacity.next_power_of_two().clamp(MIN_SIZE, MAX_SIZE);
        let mut slots = Vec::new();
        slots.try_reserve_exact(len).map_err(|_| ())?;
        slots.extend((0..len).map(|_| Slot::empty()));
        Ok(Self {
            slots: slots.into_boxed_slice(),
            len_mask: len - 1,
            record: TableRecord::fresh(size_counter, max_cells),
        })
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len_mask + 1
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        // Only this table's own slots are owned here. `next_table` is a
        // forwarding pointer, never an ownership edge: by the time a
        // `Table` is dropped, whatever points at its successor (the map's
        // top pointer, or an in-progress `retire_chain` walk) already owns
        // that successor independently. See `retire_chain` below and the
        // cyclic-references note in `DESIGN.md`.
        let g = unsafe { unprotected() };
        for slot in self.slots.iter_mut() {
            unsafe {
                slot.drop_in_place(g);
            }
        }
    }
}

/// Reclaim an entire superseded table chain (a table plus whatever
/// `next_table` links follow it), one table at a time, via the epoch
/// collector. Used by `Map::clear` and `Map::drop`, the two places a whole
/// chain — not just its head — can become unreachable at once.
///
/// SAFETY: `head` (and every table reachable from it via `next_table`)
/// must not be reachable from the map's top pointer by the time this is
/// called, and no in-flight operation may still be dereferencing any of
/// them without holding `g`.
pub(crate) unsafe fn retire_chain<K, V>(head: Shared<'_, Table<K, V>>, g: &Guard) {
    let mut cur = head;
    while !cur.is_null() {
        let next = cur.deref().record.next_table.load_rlx(g);
        g.defer_destroy(cur);
        cur = next;
    }
}
