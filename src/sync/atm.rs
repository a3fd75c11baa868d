//! Thin wrapper around [`crossbeam_epoch`] that centralizes the memory
//! orderings this crate uses for slot and table-pointer CAS.
//!
//! Every CAS on a slot field is a full acquire-release barrier, and
//! `next_table` reads during migration helpers are acquire. This module is
//! where those choices live so the rest of the crate never picks an
//! ordering ad hoc.

use core::{fmt, ops::Deref, sync::atomic::Ordering};
use crossbeam_epoch::{Atomic as CbAtomic, CompareExchangeError, Pointable, Pointer};

pub(crate) use crossbeam_epoch::{pin, unprotected, Guard, Owned, Shared};

pub(crate) const ORD_RLX: Ordering = Ordering::Relaxed;
pub(crate) const ORD_ACQ: Ordering = Ordering::Acquire;
pub(crate) const ORD_REL: Ordering = Ordering::Release;
pub(crate) const ORD_ACR: Ordering = Ordering::AcqRel;

type CxResult<'g, T, P> = Result<Shared<'g, T>, CompareExchangeError<'g, T, P>>;

/// A CAS-able pointer cell. Every non-integer atomic field on a `Slot` or
/// `Table` is one of these.
pub(crate) struct Atomic<T> {
    inner: CbAtomic<T>,
}

impl<T> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.inner)
    }
}

impl<T: Pointable> Atomic<T> {
    #[inline(always)]
    pub(crate) const fn null() -> Self {
        Self {
            inner: CbAtomic::null(),
        }
    }

    pub(crate) fn new(t: T) -> Self {
        Self {
            inner: CbAtomic::new(t),
        }
    }

    #[inline(always)]
    pub(crate) fn load<'g>(&self, ord: Ordering, g: &'g Guard) -> Shared<'g, T> {
        self.inner.load(ord, g)
    }

    #[inline(always)]
    pub(crate) fn load_acq<'g>(&self, g: &'g Guard) -> Shared<'g, T> {
        self.load(ORD_ACQ, g)
    }

    #[inline(always)]
    pub(crate) fn load_rlx<'g>(&self, g: &'g Guard) -> Shared<'g, T> {
        self.load(ORD_RLX, g)
    }

    #[inline(always)]
    pub(crate) fn cas<'g, P>(
        &self,
        current: Shared<'g, T>,
        new: P,
        success: Ordering,
        failure: Ordering,
        g: &'g Guard,
    ) -> CxResult<'g, T, P>
    where
        P: Pointer<T>,
    {
        self.inner.compare_exchange(current, new, success, failure, g)
    }

    /// The common "full barrier" CAS used on slot fields: acquire-release
    /// on success, relaxed on failure (the caller always re-reads on failure).
    #[inline(always)]
    pub(crate) fn cas_acqrel<'g, P>(
        &self,
        current: Shared<'g, T>,
        new: P,
        g: &'g Guard,
    ) -> CxResult<'g, T, P>
    where
        P: Pointer<T>,
    {
        self.cas(current, new, ORD_ACR, ORD_RLX, g)
    }

    #[inline(always)]
    pub(crate) fn swap<'g>(&self, new: Owned<T>, ord: Ordering, g: &'g Guard) -> Shared<'g, T> {
        self.inner.swap(new, ord, g)
    }

    #[inline(always)]
    pub(crate) fn fetch_or<'g>(&self, tag: usize, ord: Ordering, g: &'g Guard) -> Shared<'g, T> {
        self.inner.fetch_or(tag, ord, g)
    }
}

impl<T> Deref for Atomic<T> {
    type Target = CbAtomic<T>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
