//! The snapshot iterator.
//!
//! Before walking any slots, the cursor drains the top table to quiescence
//! (no outstanding successor) the same way any other operation would help
//! a migration along, just unconditionally instead of one chunk at a time.
//! The drained table is only ever used to enumerate which keys to
//! consider — the value returned for each key comes from a fresh top-down
//! lookup, not from the slot the key was found in, so an update made
//! after the snapshot table was chosen, or a value that has since moved
//! on to a further successor, is still observed correctly. Every entry
//! that was live for the cursor's entire lifetime is guaranteed to be
//! visited exactly once; entries inserted or removed concurrently may or
//! may not show up, same as any snapshot over a structure that keeps
//! accepting writes.

use super::{hash::KeyCapability, migrate, ops, Table};
use crate::sync::atm::{Atomic, Guard, Shared};

pub(crate) struct TableIter<'g, K, V> {
    top: &'g Atomic<Table<K, V>>,
    cap: &'g dyn KeyCapability<K>,
    table: &'g Table<K, V>,
    g: &'g Guard,
    idx: usize,
}

impl<'g, K, V> TableIter<'g, K, V>
where
    K: Clone + 'static,
    V: 'static,
{
    pub(crate) fn snapshot(top: &'g Atomic<Table<K, V>>, cap: &'g dyn KeyCapability<K>, g: &'g Guard) -> Self {
        let mut cur = top.load_acq(g);
        loop {
            let table = unsafe { cur.deref() };
            let next = table.record.next_table.load_acq(g);
            if next.is_null() {
                break;
            }
            migrate::help_copy(top, cur, cap, g, true);
            cur = top.load_acq(g);
        }
        Self {
            top,
            cap,
            table: unsafe { cur.deref() },
            g,
            idx: 0,
        }
    }
}

impl<'g, K, V> Iterator for TableIter<'g, K, V>
where
    K: Clone + 'static,
    V: 'static,
{
    type Item = (Shared<'g, K>, Shared<'g, V>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx < self.table.len() {
            let slot = &self.table.slots[self.idx];
            self.idx += 1;
            if !super::hash::is_regular(slot.read_hash()) {
                continue;
            }
            let key = slot.read_key(self.g);
            if key.is_null() {
                continue;
            }
            // SAFETY: a regular hash with a non-null key means the key
            // field was successfully claimed and is never retracted.
            let key_ref = unsafe { key.deref() };
            if let Some(value) = ops::lookup(self.top, self.cap, key_ref, self.g) {
                return Some((key, value));
            }
        }
        None
    }
}
