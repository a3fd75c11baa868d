//! The scalable counter backing live-entry accounting.
//!
//! A single atomic counter becomes the bottleneck of a concurrent map long
//! before the map's own slot CAS contention does, because every insert and
//! delete touches it. This keeps a single "base" cell for the uncontended
//! case and grows an auxiliary, cache-line-padded cell array on demand when
//! it observes drift — another thread having raced it on the same cell.
//!
//! Only `increment`/`decrement`/`add`/`value`/`estimated_value` are part of
//! the observable contract; the exact cell-growth mechanics are free to
//! change. Cells here are plain `AtomicPtr`
//! cells rather than epoch-managed pointers, because a counter's cell array
//! only ever grows — nothing is ever unlinked from it while the counter is
//! alive, so there is nothing for the epoch reclaimer to do.

use crossbeam_utils::CachePadded;
use std::{
    ptr,
    sync::atomic::{AtomicI64, AtomicPtr, AtomicU64, AtomicUsize, Ordering},
    time::Instant,
};

const ESTIMATE_STALENESS_MS: u64 = 1;

type Cell = CachePadded<AtomicI64>;

pub(crate) struct ScalableCounter {
    base: CachePadded<AtomicI64>,
    cells: Box<[AtomicPtr<Cell>]>,
    live_cells: AtomicUsize,
    created: Instant,
    cache_value: AtomicI64,
    cache_stamp_ms: AtomicU64,
}

/// `std::thread::available_parallelism`, cached process-wide: every table
/// created over the map's lifetime sizes its `slots_counter` off the same
/// reading rather than re-querying the OS per resize.
pub(crate) fn hardware_parallelism() -> usize {
    static PARALLELISM: std::sync::OnceLock<usize> = std::sync::OnceLock::new();
    *PARALLELISM.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

impl ScalableCounter {
    /// `max_cells = next_power_of_two(hardware_parallelism) + 1`.
    pub(crate) fn max_cells_for(parallelism: usize) -> usize {
        parallelism.max(1).next_power_of_two() + 1
    }

    pub(crate) fn new(max_cells: usize) -> Self {
        let max_cells = max_cells.max(1);
        let cells = (0..max_cells)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            base: CachePadded::new(AtomicI64::new(0)),
            cells,
            live_cells: AtomicUsize::new(0),
            created: Instant::now(),
            cache_value: AtomicI64::new(0),
            cache_stamp_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn increment(&self) {
        self.add(1)
    }

    pub(crate) fn decrement(&self) {
        self.add(-1)
    }

    pub(crate) fn add(&self, delta: i64) {
        let live = self.live_cells.load(Ordering::Relaxed);
        if live == 0 {
            let expected_before = self.base.load(Ordering::Relaxed);
            self.base.fetch_add(delta, Ordering::Relaxed);
            let observed = self.base.load(Ordering::Relaxed);
            let drift = observed != expected_before + delta;
            if drift {
                self.try_grow();
            }
            return;
        }
        let idx = Self::thread_cell_index() % live;
        let cell = self.cell_at(idx);
        let expected_before = cell.load(Ordering::Relaxed);
        cell.fetch_add(delta, Ordering::Relaxed);
        let observed = cell.load(Ordering::Relaxed);
        if observed != expected_before + delta {
            self.try_grow();
        }
    }

    /// Linearizable-ish sum: every in-flight `add` that had already
    /// completed its atomic step by the time each cell is read is counted
    /// exactly once; no update is ever lost.
    pub(crate) fn value(&self) -> i64 {
        let mut total = self.base.load(Ordering::Acquire);
        let live = self.live_cells.load(Ordering::Acquire);
        for i in 0..live {
            total += self.cell_at(i).load(Ordering::Acquire);
        }
        total
    }

    /// Cached for up to [`ESTIMATE_STALENESS_MS`]; may miss updates that
    /// landed on other cells since the cache was last refreshed.
    pub(crate) fn estimated_value(&self) -> i64 {
        let now_ms = self.created.elapsed().as_millis() as u64;
        let stamp = self.cache_stamp_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(stamp) < ESTIMATE_STALENESS_MS {
            return self.cache_value.load(Ordering::Relaxed);
        }
        let fresh = self.value();
        self.cache_value.store(fresh, Ordering::Relaxed);
        self.cache_stamp_ms.store(now_ms, Ordering::Relaxed);
        fresh
    }

    fn cell_at(&self, idx: usize) -> &Cell {
        // SAFETY: only indices `< live_cells` (as last observed by the
        // caller) are ever read, and a cell pointer, once published by
        // `try_grow`, is never unpublished for the counter's lifetime.
        unsafe { &*self.cells[idx].load(Ordering::Acquire) }
    }

    fn try_grow(&self) {
        let live = self.live_cells.load(Ordering::Acquire);
        if live >= self.cells.len() {
            return;
        }
        let boxed = Box::into_raw(Box::new(CachePadded::new(AtomicI64::new(0))));
        match self.cells[live].compare_exchange(
            ptr::null_mut(),
            boxed,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                self.live_cells.fetch_add(1, Ordering::AcqRel);
            }
            Err(_) => {
                // lost the race to publish this slot; someone else grew it
                drop(unsafe { Box::from_raw(boxed) });
            }
        }
    }

    /// A per-thread-stable index derived from this call's stack address.
    /// Cheap and good enough to spread contention; not a hard requirement.
    fn thread_cell_index() -> usize {
        let probe: u8 = 0;
        let addr = &probe as *const u8 as usize;
        (addr >> 4).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 16
    }
}

impl Drop for ScalableCounter {
    fn drop(&mut self) {
        for cell in self.cells.iter_mut() {
            let ptr = *cell.get_mut();
            if !ptr.is_null() {
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn single_threaded_add_and_value() {
        let c = ScalableCounter::new(ScalableCounter::max_cells_for(4));
        for _ in 0..100 {
            c.increment();
        }
        for _ in 0..40 {
            c.decrement();
        }
        assert_eq!(c.value(), 60);
        assert_eq!(c.estimated_value(), 60);
    }

    #[test]
    fn concurrent_increments_are_never_lost() {
        let c = Arc::new(ScalableCounter::new(ScalableCounter::max_cells_for(16)));
        let threads = 16;
        let per_thread = 50_000i64;
        thread::scope(|s| {
            for _ in 0..threads {
                let c = Arc::clone(&c);
                s.spawn(move || {
                    for _ in 0..per_thread {
                        c.increment();
                    }
                });
            }
        });
        assert_eq!(c.value(), threads as i64 * per_thread);
    }
}
