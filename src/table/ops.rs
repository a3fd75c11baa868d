//! The three public-facing primitives every map operation reduces to:
//! `lookup`, `put_if_match`, `get_or_add`.

use super::{
    hash::{self, KeyCapability, EMPTY_HASH},
    migrate,
    slot::ValueView,
    Table,
};
use crate::sync::atm::{Atomic, Guard, Owned, Shared, ORD_ACQ};

/// The condition under which `put_if_match` is allowed to publish a new
/// value.
pub enum Match<V> {
    /// Unconditional: insert, overwrite, or tombstone regardless of what
    /// is currently there.
    Any,
    /// Only if the slot is currently unclaimed or tombstoned (insert-if-
    /// absent).
    EmptyOrDead,
    /// Only if the slot currently holds a live value (update/remove-if-
    /// present).
    Alive,
    /// Only if the slot currently holds a live value equal to this one
    /// (compare-and-swap).
    EqualTo(V),
}

/// Result of a `put_if_match` call.
pub(crate) struct PutOutcome<'g, V> {
    /// Whether this call's value (or tombstone) was the one published.
    pub(crate) applied: bool,
    /// The live value the slot held immediately before this call, if any.
    pub(crate) previous: Option<Shared<'g, V>>,
    /// The live value the slot holds immediately after this call, if any
    /// (equal to `previous` when `applied` is false).
    pub(crate) current: Option<Shared<'g, V>>,
}

/// Find the live value for `key`, helping migration along the way.
pub(crate) fn lookup<'g, K, V>(
    top: &Atomic<Table<K, V>>,
    cap: &dyn KeyCapability<K>,
    key: &K,
    g: &'g Guard,
) -> Option<Shared<'g, V>>
where
    K: Clone + 'static,
    V: 'static,
{
    let raw = cap.hash_key(key);
    let mut table_shared = top.load_acq(g);
    loop {
        let table = unsafe { table_shared.deref() };
        let len_mask = table.len_mask;
        let start = hash::start_index(raw, len_mask);
        let limit = hash::reprobe_limit(len_mask);
        let mut abandon_table = false;
        let mut resolved = None;
        for step in 0..=limit {
            let idx = hash::reprobe(start, step, len_mask);
            let slot = &table.slots[idx];
            let h = slot.read_hash();
            if h == EMPTY_HASH {
                return None;
            }
            if h == hash::MOVED_HASH {
                abandon_table = true;
                break;
            }
            if h == raw {
                let k = slot.read_key(g);
                if k.is_null() {
                    continue;
                }
                if !cap.keys_equal(unsafe { k.deref() }, key) {
                    continue;
                }
                let v = slot.read_value(ORD_ACQ, g);
                match ValueView::from_shared(v) {
                    ValueView::Live(payload) => {
                        resolved = Some(Some(payload));
                        break;
                    }
                    ValueView::Unclaimed | ValueView::Tombstone => {
                        resolved = Some(None);
                        break;
                    }
                    ValueView::Boxed(_) | ValueView::BoxedTombstone => {
                        abandon_table = true;
                        break;
                    }
                }
            }
        }
        if let Some(found) = resolved {
            return found;
        }
        let next = table.record.next_table.load_acq(g);
        if next.is_null() {
            // either reprobe was exhausted in a table that never needed to
            // grow for this key's probe chain, or boxing raced ahead of
            // `next_table`'s publication; either way nothing more to find
            // here without a successor to consult.
            if abandon_table {
                continue;
            }
            return None;
        }
        migrate::help_copy(top, table_shared, cap, g, false);
        table_shared = next;
    }
}

/// Claim a slot for `key` (if not already claimed) and attempt to
/// publish `new_value` (or a tombstone, if `None`) according to
/// `match_kind`.
pub(crate) fn put_if_match<'g, K, V>(
    top: &Atomic<Table<K, V>>,
    cap: &dyn KeyCapability<K>,
    key: K,
    new_value: Option<V>,
    match_kind: &Match<V>,
    g: &'g Guard,
) -> PutOutcome<'g, V>
where
    K: Clone + 'static,
    V: PartialEq + 'static,
{
    let raw = cap.hash_key(&key);
    let pending = new_value.map(|v| Owned::new(v).into_shared(g));
    let mut published = false;
    let mut table_shared = top.load_acq(g);

    let outcome = 'tables: loop {
        let table = unsafe { table_shared.deref() };
        let len_mask = table.len_mask;
        let start = hash::start_index(raw, len_mask);
        let limit = hash::reprobe_limit(len_mask);

        let mut slot_idx = None;
        let mut step = 0usize;
        while step <= limit {
            let idx = hash::reprobe(start, step, len_mask);
            let slot = &table.slots[idx];
            let h = slot.read_hash();
            if h == EMPTY_HASH {
                if slot.try_claim_hash(raw) {
                    table.record.slots_counter.increment();
                    if super::is_crowded(table.record.slots_used(), table.len()) {
                        migrate::ensure_successor(table, g);
                    }
                } else {
                    continue; // someone else claimed it; re-read this same step
                }
            }
            let h = slot.read_hash();
            if h == hash::MOVED_HASH {
                break;
            }
            if h == raw {
                match slot.try_claim_key(key.clone(), g) {
                    Ok(()) => {
                        slot_idx = Some(idx);
                        break;
                    }
                    Err(existing) => {
                        if !existing.is_null() && cap.keys_equal(unsafe { existing.deref() }, &key) {
                            slot_idx = Some(idx);
                            break;
                        }
                        // hash collision with a different key: keep probing.
                    }
                }
            }
            step += 1;
        }

        let Some(idx) = slot_idx else {
            // Reprobe exhausted or a MOVED marker was hit: this table is
            // either full or mid-migration. A successor must exist (a
            // crowded table always triggers one before its probe chains
            // can fill this far); help drain it and retry there.
            migrate::ensure_successor(table, g);
            migrate::help_copy(top, table_shared, cap, g, false);
            table_shared = table.record.next_table.load_acq(g);
            continue 'tables;
        };

        let slot = &table.slots[idx];
        loop {
            let current = slot.read_value(ORD_ACQ, g);
            let view = ValueView::from_shared(current);
            if view.is_boxed() {
                migrate::help_copy(top, table_shared, cap, g, false);
                table_shared = table.record.next_table.load_acq(g);
                continue 'tables;
            }
            let previous = view.live_payload();
            let applies = match match_kind {
                Match::Any => true,
                Match::EmptyOrDead => previous.is_none(),
                Match::Alive => previous.is_some(),
                Match::EqualTo(expected) => {
                    previous.is_some_and(|p| unsafe { p.deref() } == expected)
                }
            };
            if !applies {
                break 'tables PutOutcome {
                    applied: false,
                    previous,
                    current: previous,
                };
            }
            let new_shared = pending.unwrap_or_else(|| Shared::null().with_tag(super::slot::TAG_TOMBSTONE));
            match slot.cas_value(current, new_shared, g) {
                Ok(_) => {
                    published = true;
                    match (previous.is_some(), pending.is_some()) {
                        (false, true) => table.record.size_counter.increment(),
                        (true, false) => table.record.size_counter.decrement(),
                        _ => {}
                    }
                    break 'tables PutOutcome {
                        applied: true,
                        previous,
                        current: pending,
                    };
                }
                Err(_) => continue,
            }
        }
    };

    if pending.is_some() && !published {
        // never published; reclaim the allocation we made up front.
        if let Some(p) = pending {
            unsafe { drop(p.into_owned()) };
        }
    }
    outcome
}

/// Read-or-initialize. Calls `make` at most once, only once this
/// table genuinely has no live value for `key`; if a concurrent writer
/// wins the race to populate the same slot first, the freshly made value
/// is discarded and the winner's value is returned instead.
pub(crate) fn get_or_add<'g, K, V>(
    top: &Atomic<Table<K, V>>,
    cap: &dyn KeyCapability<K>,
    key: K,
    make: impl FnOnce() -> V,
    g: &'g Guard,
) -> Shared<'g, V>
where
    K: Clone + 'static,
    V: PartialEq + 'static,
{
    if let Some(v) = lookup(top, cap, &key, g) {
        return v;
    }
    let value = make();
    let outcome = put_if_match(top, cap, key, Some(value), &Match::EmptyOrDead, g);
    outcome
        .current
        .expect("EmptyOrDead put always leaves a live value behind, ours or a racing winner's")
}

/// Internal insert used only by the migration copier: claims a
/// slot in `new` for a key already known not to exist there yet, without
/// touching `size_counter` (the chain-wide counter already reflects this
/// entry from when it was first inserted).
pub(crate) fn copy_into<'g, K, V>(
    new: &Table<K, V>,
    cap: &dyn KeyCapability<K>,
    key: &K,
    raw_hash: u32,
    payload: Shared<'g, V>,
    g: &'g Guard,
) where
    K: Clone,
{
    let len_mask = new.len_mask;
    let start = hash::start_index(raw_hash, len_mask);
    let limit = hash::reprobe_limit(len_mask);
    let mut step = 0usize;
    while step <= limit {
        let idx = hash::reprobe(start, step, len_mask);
        let slot = &new.slots[idx];
        let h = slot.read_hash();
        if h == EMPTY_HASH && slot.try_claim_hash(raw_hash) {
            new.record.slots_counter.increment();
            let _ = slot.try_claim_key(key.clone(), g);
            let _ = slot.cas_value(Shared::null(), payload, g);
            return;
        }
        let h = slot.read_hash();
        if h == raw_hash {
            let existing = slot.read_key(g);
            if !existing.is_null() && cap.keys_equal(unsafe { existing.deref() }, key) {
                let _ = slot.cas_value(Shared::null(), payload, g);
                return;
            }
        }
        step += 1;
    }
    // A crowded-enough successor to overflow its own reprobe chain during
    // a copy would mean `desired_len` badly undersized it; treat as a
    // logic error rather than silently drop the entry.
    unreachable!("migration successor table overflowed during copy");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        counter::ScalableCounter,
        sync::atm::pin,
        table::{hash::StdCapability, Table, MIN_SIZE},
    };
    use std::{collections::hash_map::RandomState, sync::Arc};

    fn fresh_table() -> (Atomic<Table<&'static str, i32>>, StdCapability<RandomState>) {
        let size_counter = Arc::new(ScalableCounter::new(ScalableCounter::max_cells_for(1)));
        let table = Table::new(MIN_SIZE, size_counter, ScalableCounter::max_cells_for(1));
        (Atomic::new(table), StdCapability::new(RandomState::new()))
    }

    #[test]
    fn lookup_on_empty_table_is_none() {
        let (top, cap) = fresh_table();
        let g = pin();
        assert!(lookup(&top, &cap, &"missing", &g).is_none());
    }

    #[test]
    fn put_then_lookup_round_trips() {
        let (top, cap) = fresh_table();
        let g = pin();
        let out = put_if_match(&top, &cap, "a", Some(1), &Match::Any, &g);
        assert!(out.applied);
        assert!(out.previous.is_none());
        let found = lookup(&top, &cap, &"a", &g).unwrap();
        assert_eq!(unsafe { *found.deref() }, 1);
    }

    #[test]
    fn remove_then_lookup_is_none() {
        let (top, cap) = fresh_table();
        let g = pin();
        put_if_match(&top, &cap, "a", Some(1), &Match::Any, &g);
        let out = put_if_match(&top, &cap, "a", None, &Match::Alive, &g);
        assert!(out.applied);
        assert!(lookup(&top, &cap, &"a", &g).is_none());
    }

    #[test]
    fn get_or_add_only_installs_once() {
        let (top, cap) = fresh_table();
        let g = pin();
        let first = unsafe { *get_or_add(&top, &cap, "a", || 7, &g).deref() };
        let second = unsafe { *get_or_add(&top, &cap, "a", || 99, &g).deref() };
        assert_eq!(first, 7);
        assert_eq!(second, 7);
    }

    #[test]
    fn compare_and_swap_fails_on_mismatch() {
        let (top, cap) = fresh_table();
        let g = pin();
        put_if_match(&top, &cap, "a", Some(1), &Match::Any, &g);
        let out = put_if_match(&top, &cap, "a", Some(2), &Match::EqualTo(999), &g);
        assert!(!out.applied);
        assert_eq!(unsafe { *lookup(&top, &cap, &"a", &g).unwrap().deref() }, 1);
    }
}
