//! The public entry point: a thin conventional-map shim over
//! `table::ops`'s three primitives, generic the same way
//! `std::collections::HashMap<K, V, S>` is over its hasher.

use crate::{
    counter::{hardware_parallelism, ScalableCounter},
    error::{MapError, MapResult},
    sync::atm::{pin, unprotected, Atomic, Guard},
    table::{self, hash::StdCapability, ops, retire_chain, Table, MIN_SIZE},
};
use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

pub use crate::table::ops::Match;

/// The key-type specialization axis. Only `ReferenceKeys` has a distinct
/// code path today (see `DESIGN.md` OQ-1); the others are accepted so
/// callers can compile against the full configuration surface and get the
/// same behavior until one earns its own path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Specialization {
    #[default]
    ReferenceKeys,
    Integer32Keys,
    Integer64Keys,
    NativeIntKeys,
    BoxedValueKeys,
}

/// Constructor-time configuration.
#[derive(Debug, Clone)]
pub struct MapConfig {
    pub initial_capacity: usize,
    pub specialization: Specialization,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_capacity: MIN_SIZE,
            specialization: Specialization::ReferenceKeys,
        }
    }
}

/// A lock-free, linearizable concurrent hash map.
///
/// Every read/write takes an explicit [`Guard`] (obtained from [`Map::pin`])
/// so that references borrowed out of the map stay valid for exactly as
/// long as the calling thread holds it — the same contract `crossbeam`'s
/// own epoch-based structures expose.
pub struct Map<K, V, S = RandomState> {
    top: Atomic<Table<K, V>>,
    cap: StdCapability<S>,
    specialization: Specialization,
}

impl<K, V, S> Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    pub fn new() -> Self {
        Self::with_config(MapConfig::default()).expect("default config is always valid")
    }

    pub fn with_capacity(capacity: usize) -> MapResult<Self> {
        Self::with_config(MapConfig {
            initial_capacity: capacity,
            ..MapConfig::default()
        })
    }

    pub fn with_config(config: MapConfig) -> MapResult<Self> {
        if config.initial_capacity == 0 {
            return Err(MapError::InvalidCapacity);
        }
        Self::try_with_capability(StdCapability::new(S::default()), config)
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn with_capability(cap: StdCapability<S>, config: MapConfig) -> Self {
        let initial_capacity = config.initial_capacity;
        Self::try_with_capability(cap, config)
            .unwrap_or_else(|_| panic!("allocation failed for a table of length {}", initial_capacity))
    }

    fn try_with_capability(cap: StdCapability<S>, config: MapConfig) -> MapResult<Self> {
        let size_counter = Arc::new(ScalableCounter::new(ScalableCounter::max_cells_for(
            hardware_parallelism(),
        )));
        let table = Table::try_new(
            config.initial_capacity,
            size_counter,
            ScalableCounter::max_cells_for(hardware_parallelism()),
        )
        .map_err(|_| MapError::SuccessorAllocation)?;
        Ok(Self {
            top: Atomic::new(table),
            cap,
            specialization: config.specialization,
        })
    }

    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capability(StdCapability::new(hasher), MapConfig::default())
    }

    /// Fallible construction from an explicit, possibly-absent hasher: the
    /// entry point for a caller building a `Map` from an upstream
    /// `Option<S>` that is itself fallible to produce, rather than always
    /// having a `Default` hasher on hand.
    pub fn new_with_capability(hasher: Option<S>, config: MapConfig) -> MapResult<Self> {
        let hasher = hasher.ok_or(MapError::NullCapability)?;
        if config.initial_capacity == 0 {
            return Err(MapError::InvalidCapacity);
        }
        Self::try_with_capability(StdCapability::new(hasher), config)
    }

    pub fn specialization(&self) -> Specialization {
        self.specialization
    }

    /// Pin the current epoch. References returned from `get`/`insert`/etc.
    /// are valid for as long as the returned guard is held.
    pub fn pin(&self) -> Guard {
        pin()
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Hash + Eq + Clone + 'static,
    V: PartialEq + 'static,
    S: BuildHasher,
{
    pub fn get<'g>(&self, key: &K, guard: &'g Guard) -> Option<&'g V> {
        ops::lookup(&self.top, &self.cap, key, guard).map(|v| unsafe { v.deref() })
    }

    pub fn contains_key(&self, key: &K, guard: &Guard) -> bool {
        ops::lookup(&self.top, &self.cap, key, guard).is_some()
    }

    /// Unconditional insert; returns the value previously there, if any.
    pub fn insert<'g>(&self, key: K, value: V, guard: &'g Guard) -> Option<&'g V> {
        let out = ops::put_if_match(&self.top, &self.cap, key, Some(value), &Match::Any, guard);
        out.previous.map(|v| unsafe { v.deref() })
    }

    /// Insert only if `key` is not already present; returns the value that
    /// ends up live for `key` either way, plus whether this call's value
    /// is the one that won.
    pub fn insert_if_absent<'g>(&self, key: K, value: V, guard: &'g Guard) -> (bool, &'g V) {
        let out = ops::put_if_match(&self.top, &self.cap, key, Some(value), &Match::EmptyOrDead, guard);
        let current = out
            .current
            .expect("EmptyOrDead insert always leaves a live value behind");
        (out.applied, unsafe { current.deref() })
    }

    /// Update only if `key` is already present; returns the prior value.
    pub fn update<'g>(&self, key: K, value: V, guard: &'g Guard) -> Option<&'g V> {
        let out = ops::put_if_match(&self.top, &self.cap, key, Some(value), &Match::Alive, guard);
        out.previous.map(|v| unsafe { v.deref() })
    }

    /// Compare-and-swap: publish `new` only if the current live value
    /// equals `expected`.
    pub fn compare_and_swap(&self, key: K, expected: V, new: V, guard: &Guard) -> bool {
        ops::put_if_match(&self.top, &self.cap, key, Some(new), &Match::EqualTo(expected), guard).applied
    }

    /// Remove `key`; returns the value that was there.
    pub fn remove<'g>(&self, key: K, guard: &'g Guard) -> Option<&'g V> {
        let out = ops::put_if_match(&self.top, &self.cap, key, None, &Match::Alive, guard);
        out.previous.map(|v| unsafe { v.deref() })
    }

    /// The general conditional write every other mutator above is built
    /// from: publish `value` (or remove, if `None`) only if the slot's
    /// current state satisfies `condition`. Returns whether this call's
    /// write was the one applied, plus the value now live for `key`.
    pub fn put_if_match<'g>(
        &self,
        key: K,
        value: Option<V>,
        condition: &Match<V>,
        guard: &'g Guard,
    ) -> (bool, Option<&'g V>) {
        let out = ops::put_if_match(&self.top, &self.cap, key, value, condition, guard);
        (out.applied, out.current.map(|v| unsafe { v.deref() }))
    }

    /// Read the live value for `key`, or atomically install one
    /// produced by `make` if none exists yet.
    pub fn get_or_insert_with<'g>(&self, key: K, make: impl FnOnce() -> V, guard: &'g Guard) -> &'g V {
        unsafe { ops::get_or_add(&self.top, &self.cap, key, make, guard).deref() }
    }

    /// Linearizable live-entry count. Forces a full walk of the
    /// scalable counter's cells; prefer [`Map::len_hint`] for sizing.
    pub fn count(&self) -> usize {
        let guard = pin();
        let table = unsafe { self.top.load_acq(&guard).deref() };
        table.record.size_counter.value().max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Cheap, possibly-stale size estimate: for sizing a
    /// `Vec::with_capacity`, not for correctness-sensitive reads.
    pub fn len_hint(&self) -> usize {
        let guard = pin();
        let table = unsafe { self.top.load_acq(&guard).deref() };
        table.record.size_counter.estimated_value().max(0) as usize
    }

    /// Replace the whole map with a fresh, empty table. There is no
    /// aggressive shrink-on-delete, so an explicit `clear` is the
    /// bulk-reset primitive.
    pub fn clear(&self) {
        let guard = pin();
        let size_counter = Arc::new(ScalableCounter::new(ScalableCounter::max_cells_for(
            hardware_parallelism(),
        )));
        let fresh = crate::sync::atm::Owned::new(Table::new(
            MIN_SIZE,
            size_counter,
            ScalableCounter::max_cells_for(hardware_parallelism()),
        ));
        let old = self.top.swap(fresh, crate::sync::atm::ORD_ACR, &guard);
        if !old.is_null() {
            unsafe { retire_chain(old, &guard) };
        }
    }

    /// A consistent point-in-time copy of every entry live throughout the
    /// call. Eagerly materialized so callers never hold a `Guard`
    /// longer than this call.
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = pin();
        table::iter::TableIter::snapshot(&self.top, &self.cap, &guard)
            .map(|(k, v)| (unsafe { k.deref() }.clone(), unsafe { v.deref() }.clone()))
            .collect()
    }
}

impl<K, V, S> Default for Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Drop for Map<K, V, S> {
    fn drop(&mut self) {
        // Sole owner at this point: no concurrent operation can be racing
        // a drop of the map itself.
        let g = unsafe { unprotected() };
        let top = self.top.load_rlx(g);
        if !top.is_null() {
            let mut cur = top;
            while !cur.is_null() {
                let next = unsafe { cur.deref() }.record.next_table.load_rlx(g);
                drop(unsafe { cur.into_owned() });
                cur = next;
            }
        }
    }
}
