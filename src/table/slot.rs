//! The per-slot atomic state machine.
//!
//! A slot's `(hash, key, value)` triple only ever moves forward:
//! `EMPTY -> claimed-hash -> claimed-key -> {live, TOMBSTONE}* -> Boxed`.
//! The value field's four live states plus its "boxed, frozen for this
//! table" variant are encoded as tag bits on the epoch pointer instead of
//! widening the field — tagging avoids an extra indirection on the
//! hottest field in the whole map.

use crate::sync::atm::{Atomic, Guard, Owned, Shared, ORD_ACQ, ORD_ACR, ORD_RLX};
use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const TAG_NONE: usize = 0b00;
pub(crate) const TAG_TOMBSTONE: usize = 0b01;
pub(crate) const TAG_BOXED: usize = 0b10;
pub(crate) const TAG_BOXED_TOMBSTONE: usize = 0b11;

/// A classified read of a slot's value field.
pub(crate) enum ValueView<'g, V> {
    /// Null pointer, no tag: never had a value.
    Unclaimed,
    /// Null pointer, `TAG_TOMBSTONE`: logically deleted.
    Tombstone,
    /// Non-null, no tag: a live payload.
    Live(Shared<'g, V>),
    /// Non-null, `TAG_BOXED`: frozen during migration, still has a payload
    /// for the copier to transport.
    Boxed(Shared<'g, V>),
    /// Null, `TAG_BOXED_TOMBSTONE`: frozen during migration, nothing to
    /// transport (was unclaimed or tombstoned when boxing happened).
    BoxedTombstone,
}

impl<'g, V> ValueView<'g, V> {
    #[inline(always)]
    pub(crate) fn from_shared(s: Shared<'g, V>) -> Self {
        match (s.is_null(), s.tag()) {
            (true, TAG_NONE) => ValueView::Unclaimed,
            (true, TAG_TOMBSTONE) => ValueView::Tombstone,
            (false, TAG_NONE) => ValueView::Live(s),
            (false, TAG_BOXED) => ValueView::Boxed(s),
            (true, TAG_BOXED_TOMBSTONE) => ValueView::BoxedTombstone,
            // a live (non-null) pointer tagged TOMBSTONE or a null pointer
            // tagged BOXED alone never occur: nothing in this module
            // constructs them.
            _ => unreachable!("logic: impossible slot value tag combination"),
        }
    }

    #[inline(always)]
    pub(crate) fn is_boxed(&self) -> bool {
        matches!(self, ValueView::Boxed(_) | ValueView::BoxedTombstone)
    }

    #[inline(always)]
    pub(crate) fn is_live(&self) -> bool {
        matches!(self, ValueView::Live(_))
    }

    /// The payload this state is "found" as by a lookup, or `None` if the
    /// key should be reported absent.
    #[inline(always)]
    pub(crate) fn live_payload(&self) -> Option<Shared<'g, V>> {
        match *self {
            ValueView::Live(v) => Some(v),
            _ => None,
        }
    }
}

pub(crate) struct Slot<K, V> {
    pub(crate) hash: AtomicU32,
    pub(crate) key: Atomic<K>,
    pub(crate) value: Atomic<V>,
}

impl<K, V> Slot<K, V> {
    pub(crate) fn empty() -> Self {
        Self {
            hash: AtomicU32::new(super::hash::EMPTY_HASH),
            key: Atomic::null(),
            value: Atomic::null(),
        }
    }

    #[inline(always)]
    pub(crate) fn read_hash(&self) -> u32 {
        self.hash.load(Ordering::Acquire)
    }

    /// Attempt to claim this slot's hash field for `h`. Only ever called
    /// when the field was last observed `EMPTY_HASH`.
    #[inline(always)]
    pub(crate) fn try_claim_hash(&self, h: u32) -> bool {
        self.hash
            .compare_exchange(
                super::hash::EMPTY_HASH,
                h,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Mark a still-empty slot `MOVED_HASH` so no new key can claim it in
    /// this table. Returns whether this call won the race.
    #[inline(always)]
    pub(crate) fn try_mark_moved_if_empty(&self) -> bool {
        self.hash
            .compare_exchange(
                super::hash::EMPTY_HASH,
                super::hash::MOVED_HASH,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[inline(always)]
    pub(crate) fn read_key<'g>(&self, g: &'g Guard) -> Shared<'g, K> {
        self.key.load_acq(g)
    }

    /// Try to claim the key field from unclaimed to `k`. On failure, the
    /// winning key is returned so the caller can compare it against `k`
    /// without re-reading.
    pub(crate) fn try_claim_key<'g>(&self, k: K, g: &'g Guard) -> Result<(), Shared<'g, K>> {
        match self.key.cas(Shared::null(), Owned::new(k), ORD_ACR, ORD_ACQ, g) {
            Ok(_) => Ok(()),
            Err(e) => {
                // the Owned we tried to publish was never observed by any
                // other thread; drop it directly instead of deferring.
                drop(e.new);
                Err(e.current)
            }
        }
    }

    #[inline(always)]
    pub(crate) fn read_value<'g>(&self, ord: Ordering, g: &'g Guard) -> Shared<'g, V> {
        self.value.load(ord, g)
    }

    #[inline(always)]
    pub(crate) fn cas_value<'g>(
        &self,
        current: Shared<'g, V>,
        new: Shared<'g, V>,
        g: &'g Guard,
    ) -> Result<Shared<'g, V>, Shared<'g, V>> {
        self.value
            .cas_acqrel(current, new, g)
            .map_err(|e| e.current)
    }

    /// Freeze this slot's value field for migration: retag the
    /// current pointer `TAG_BOXED` (payload preserved for the copier) or,
    /// if it was null, swap straight to `TAG_BOXED_TOMBSTONE`. Loops until
    /// the CAS wins since a concurrent writer may be racing the same
    /// field; once boxed, no further writer can win, so this always
    /// terminates.
    pub(crate) fn box_for_migration<'g>(&self, g: &'g Guard) -> ValueView<'g, V> {
        loop {
            let current = self.value.load_acq(g);
            if current.tag() == TAG_BOXED || current.tag() == TAG_BOXED_TOMBSTONE {
                return ValueView::from_shared(current);
            }
            let boxed = if current.is_null() {
                Shared::null().with_tag(TAG_BOXED_TOMBSTONE)
            } else {
                current.with_tag(TAG_BOXED)
            };
            if self.cas_value(current, boxed, g).is_ok() {
                return ValueView::from_shared(boxed);
            }
        }
    }

    /// After a copy into the successor table has landed, overwrite this
    /// slot's value with a definitive moved marker so `drop_in_place`
    /// never finds the payload pointer here again — the successor now owns
    /// it exclusively. `boxed` must be the exact tagged pointer last
    /// observed in this field (the `TAG_BOXED` value `box_for_migration`
    /// returned); losing the race here means another helper already
    /// finalized the slot, which is fine.
    #[inline(always)]
    pub(crate) fn finalize_moved<'g>(&self, boxed: Shared<'g, V>, g: &'g Guard) {
        let _ = self.cas_value(boxed, Shared::null().with_tag(TAG_BOXED_TOMBSTONE), g);
    }

    /// SAFETY: caller holds exclusive access to the table this slot lives
    /// in (only called from `Table::drop`).
    pub(crate) unsafe fn drop_in_place(&mut self, g: &Guard) {
        let key = self.key.load_rlx(g);
        if !key.is_null() {
            drop(key.into_owned());
        }
        let value = self.value.load_rlx(g);
        if !value.is_null() {
            drop(value.into_owned());
        }
    }
}
