//! Cooperative incremental migration.
//!
//! No single thread ever copies a whole table. Whoever notices a table is
//! crowded allocates a successor (admission-controlled so only a couple of
//! threads race the allocation), and from then on every operation that
//! touches the old table — lookups, writers, the snapshot iterator — helps
//! drain a chunk of it before doing its own work. Whoever finishes the last
//! chunk promotes the successor to top.

use super::{
    hash::KeyCapability, ops, slot::{ValueView, TAG_NONE}, Table, CHUNK_SIZE, MAX_CHURN_SIZE,
    MAX_SIZE, MIN_SIZE, RESIZE_MILLIS_TARGET,
};
use crate::{
    counter::{hardware_parallelism, ScalableCounter},
    sync::{
        atm::{Atomic, Guard, Owned, Shared, ORD_ACQ, ORD_ACR, ORD_RLX},
        Backoff,
    },
};
use std::sync::{atomic::Ordering, Arc};

/// How large the successor should be, given this table's current load and
/// how recently it was itself promoted.
///
/// The churn heuristic only engages when the raw doubled baseline would
/// not actually grow the table (i.e. the table is full of tombstones, not
/// genuinely crowded): a short gap since the last promotion then widens
/// aggressively, while a longer gap scales the target down proportionally
/// to how much time has actually passed, so a delete-heavy workload
/// doesn't oscillate between expanding and shrinking.
fn desired_len<K, V>(table: &Table<K, V>) -> usize {
    let live = table.record.size_counter.value().max(0) as usize;
    let floor = (table.len() / 4).max(MIN_SIZE / 2);
    let baseline = (live + floor) * 2;
    let target = if baseline <= table.len() {
        let elapsed_ms = table.record.promoted_at.elapsed().as_millis() as u64;
        if elapsed_ms < RESIZE_MILLIS_TARGET {
            (table.len() * 2).min(MAX_CHURN_SIZE.max(table.len() * 2))
        } else {
            let proportional = (table.len() as u128 * RESIZE_MILLIS_TARGET as u128
                / elapsed_ms.max(1) as u128) as usize;
            proportional.max(MIN_SIZE)
        }
    } else {
        baseline
    };
    target.next_power_of_two().clamp(MIN_SIZE, MAX_SIZE)
}

/// Allocate and publish this table's successor if nobody has yet, with
/// admission control: once two threads are already racing the allocation,
/// everyone else just spins on `next_table` instead of adding a third
/// allocator.
pub(crate) fn ensure_successor<'g, K, V>(table: &Table<K, V>, g: &'g Guard) -> Shared<'g, Table<K, V>> {
    let existing = table.record.next_table.load_acq(g);
    if !existing.is_null() {
        return existing;
    }
    if table.record.resizers.fetch_add(1, Ordering::AcqRel) >= 2 {
        table.record.resizers.fetch_sub(1, Ordering::AcqRel);
        let backoff = Backoff::new();
        loop {
            let next = table.record.next_table.load_acq(g);
            if !next.is_null() {
                return next;
            }
            backoff.spin();
        }
    }
    let len = desired_len(table);
    let churning = table.record.promoted_at.elapsed().as_millis() < RESIZE_MILLIS_TARGET as u128;
    let successor = Owned::new(Table::new(
        len,
        Arc::clone(&table.record.size_counter),
        ScalableCounter::max_cells_for(hardware_parallelism()),
    ));
    let published = match table
        .record
        .next_table
        .cas(Shared::null(), successor, ORD_ACR, ORD_ACQ, g)
    {
        Ok(s) => {
            log::debug!(
                "resizing table of length {} to {len} (churning={churning})",
                table.len()
            );
            s
        }
        Err(e) => {
            drop(e.new);
            e.current
        }
    };
    table.record.resizers.fetch_sub(1, Ordering::AcqRel);
    published
}

/// Claim the next unclaimed chunk of slot indices in `table`, or `None` if
/// every chunk has already been claimed.
fn claim_chunk<K, V>(table: &Table<K, V>) -> Option<std::ops::Range<usize>> {
    let len = table.len();
    let start = table.record.claimed_chunk.fetch_add(CHUNK_SIZE, Ordering::AcqRel);
    if start >= len {
        return None;
    }
    Some(start..len.min(start + CHUNK_SIZE))
}

/// If the chunk cursor has run more than twice around the table,
/// something is pathological (a table so small `CHUNK_SIZE` overshoots it
/// repeatedly under heavy contention) — fall back to a plain serial drain
/// instead of racing more chunk claims.
fn panicked<K, V>(table: &Table<K, V>) -> bool {
    table.record.claimed_chunk.load(Ordering::Acquire) > 2 * table.len().max(CHUNK_SIZE)
}

/// Copy one old slot into the successor table, if it holds a live value,
/// and freeze the old slot so no writer can touch it again.
fn copy_one<K: Clone, V>(old: &Table<K, V>, new: &Table<K, V>, cap: &dyn KeyCapability<K>, idx: usize, g: &Guard) {
    let slot = &old.slots[idx];
    if slot.try_mark_moved_if_empty() {
        return;
    }
    let hash = slot.read_hash();
    if !super::hash::is_regular(hash) {
        // already MOVED_HASH: another helper got here first.
        return;
    }
    let boxed = slot.box_for_migration(g);
    if let ValueView::Boxed(payload) = boxed {
        let key = slot.read_key(g);
        if key.is_null() {
            return;
        }
        // SAFETY: a regular hash with a non-null key means the key field
        // was successfully claimed and is never retracted.
        let key_ref = unsafe { key.deref() };
        // `payload` still carries the TAG_BOXED tag `box_for_migration` set
        // on it; the successor table's slot must start clean, or it reads
        // as already mid-migration the moment it's installed.
        ops::copy_into(new, cap, key_ref, hash, payload.with_tag(TAG_NONE), g);
        // The old slot can't be allowed to keep a pointer the successor
        // table now also owns; finalize it to a moved marker so the old
        // table's eventual drop never touches this payload.
        slot.finalize_moved(payload, g);
    }
}

/// Drain chunks of `old` into its successor until either one chunk has
/// been processed (`copy_all = false`, the ordinary help-on-touch path) or
/// no chunks remain (`copy_all = true`, used by the snapshot iterator and
/// by panic mode), then attempt promotion if the copy just completed.
///
/// `old` must currently have a published `next_table`; callers only reach
/// here once they have observed that to be true.
pub(crate) fn help_copy<'g, K, V>(
    top: &Atomic<Table<K, V>>,
    old: Shared<'g, Table<K, V>>,
    cap: &dyn KeyCapability<K>,
    g: &'g Guard,
    copy_all: bool,
) where
    K: Clone + 'static,
    V: 'static,
{
    let old_table = unsafe { old.deref() };
    let next = old_table.record.next_table.load_acq(g);
    if next.is_null() {
        return;
    }
    let new_table = unsafe { next.deref() };
    log::trace!(
        "helping migration of table (len {}) -> (len {})",
        old_table.len(),
        new_table.len()
    );
    if panicked(old_table) {
        log::warn!(
            "migration of table (len {}) entered panic mode, draining serially",
            old_table.len()
        );
        drain_serially(old_table, new_table, cap, g);
    } else {
        loop {
            let Some(range) = claim_chunk(old_table) else {
                break;
            };
            for idx in range.clone() {
                copy_one(old_table, new_table, cap, idx, g);
            }
            old_table.record.copy_done.fetch_add(range.len(), Ordering::AcqRel);
            if !copy_all {
                break;
            }
        }
    }
    try_promote(top, old, g);
}

/// Serial fallback for panic mode: one thread (whoever observes
/// `panicked`) walks every slot directly rather than racing chunk claims
/// that keep overshooting a table too small for `CHUNK_SIZE`.
fn drain_serially<K: Clone, V>(old: &Table<K, V>, new: &Table<K, V>, cap: &dyn KeyCapability<K>, g: &Guard) {
    for idx in 0..old.len() {
        copy_one(old, new, cap, idx, g);
    }
    old.record.copy_done.store(old.len(), Ordering::Release);
}

/// True once every slot in `table` has a copy recorded against it.
pub(crate) fn copy_complete<K, V>(table: &Table<K, V>) -> bool {
    table.record.copy_done() >= table.len()
}

/// Swap `top` from `old` to `old`'s successor once the copy is complete.
/// Idempotent: every helper that notices completion races this CAS, and
/// exactly one wins; the rest observe `top` already updated. The old table
/// is retired via the epoch collector by whichever thread wins — it frees
/// only its own slots (`Table::drop`), never its successor, which `top`
/// now owns directly.
pub(crate) fn try_promote<'g, K, V>(top: &Atomic<Table<K, V>>, old: Shared<'g, Table<K, V>>, g: &'g Guard) -> bool
where
    K: 'static,
    V: 'static,
{
    if !copy_complete(unsafe { old.deref() }) {
        return false;
    }
    let new = unsafe { old.deref() }.record.next_table.load_acq(g);
    if new.is_null() {
        return false;
    }
    match top.cas(old, new, ORD_ACR, ORD_RLX, g) {
        Ok(_) => {
            unsafe { g.defer_destroy(old) };
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        counter::ScalableCounter,
        table::{hash::StdCapability, ops, ops::Match},
    };
    use std::collections::hash_map::RandomState;

    #[test]
    fn crowding_a_small_table_eventually_promotes_a_successor() {
        let cap = StdCapability::new(RandomState::new());
        let size_counter = Arc::new(ScalableCounter::new(ScalableCounter::max_cells_for(1)));
        let top = Atomic::new(Table::new(MIN_SIZE, size_counter, ScalableCounter::max_cells_for(1)));
        let g = crate::sync::atm::pin();

        for i in 0..(MIN_SIZE * 4) {
            ops::put_if_match(&top, &cap, i, Some(i), &Match::Any, &g);
        }

        let root = unsafe { top.load_acq(&g).deref() };
        assert!(root.len() > MIN_SIZE, "table should have grown past its starting length");
        for i in 0..(MIN_SIZE * 4) {
            assert_eq!(ops::lookup(&top, &cap, &i, &g).map(|v| unsafe { *v.deref() }), Some(i));
        }
    }

    #[test]
    fn desired_len_widens_after_a_rapid_second_resize() {
        let size_counter = Arc::new(ScalableCounter::new(ScalableCounter::max_cells_for(1)));
        let table: Table<i32, i32> = Table::new(MIN_SIZE, size_counter, ScalableCounter::max_cells_for(1));
        // fresh table's `promoted_at` is effectively "just now" and it is
        // empty, so the raw baseline is <= the current length and the
        // churn branch engages immediately.
        assert!(desired_len(&table) >= table.len() * 2);
    }

    #[test]
    fn desired_len_does_not_churn_when_the_table_is_genuinely_crowded() {
        let size_counter = Arc::new(ScalableCounter::new(ScalableCounter::max_cells_for(1)));
        let table: Table<i32, i32> = Table::new(MIN_SIZE, size_counter, ScalableCounter::max_cells_for(1));
        // enough live entries that the raw doubled baseline already
        // exceeds the table's current length: this must take the plain
        // baseline branch, not the churn-widening one, however recently
        // the table was promoted.
        let live = MIN_SIZE * 3;
        for _ in 0..live {
            table.record.size_counter.increment();
        }
        let floor = (table.len() / 4).max(MIN_SIZE / 2);
        let expected = ((live + floor) * 2).next_power_of_two().clamp(MIN_SIZE, MAX_SIZE);
        assert_eq!(desired_len(&table), expected);
    }

    #[test]
    fn copy_one_strips_the_tag_and_finalizes_the_old_slot() {
        let cap = StdCapability::new(RandomState::new());
        let size_counter = Arc::new(ScalableCounter::new(ScalableCounter::max_cells_for(1)));
        let old_top = Atomic::new(Table::new(MIN_SIZE, Arc::clone(&size_counter), ScalableCounter::max_cells_for(1)));
        let g = crate::sync::atm::pin();
        ops::put_if_match(&old_top, &cap, "a", Some(42), &Match::Any, &g);

        let old_shared = old_top.load_acq(&g);
        let old_table = unsafe { old_shared.deref() };
        let new_table = Table::new(MIN_SIZE, size_counter, ScalableCounter::max_cells_for(1));

        let idx = (0..old_table.len())
            .find(|&i| crate::table::hash::is_regular(old_table.slots[i].read_hash()))
            .expect("inserted key occupies a slot");
        copy_one(old_table, &new_table, &cap, idx, &g);

        // the old slot must no longer hold the payload pointer now owned
        // by the successor, or `Table::drop` would free it twice.
        let old_value = old_table.slots[idx].read_value(ORD_ACQ, &g);
        assert!(old_value.is_null());
        assert_eq!(old_value.tag(), crate::table::slot::TAG_BOXED_TOMBSTONE);

        // the successor's slot must hold a clean, untagged live payload.
        let new_top = Atomic::new(new_table);
        let found = ops::lookup(&new_top, &cap, &"a", &g).expect("copied value is visible");
        assert_eq!(unsafe { *found.deref() }, 42);
    }
}
