//! Debug-only reentrancy guard for the entry table.
//!
//! The table calls out to user and host code in a few places: `K: Eq/Hash`
//! while probing, and the registry's `register` while a fresh slot is being
//! linked in. None of those callbacks may touch the table again. In debug
//! builds the guard remembers which table operation is in progress and a
//! nested entry panics naming both; in release builds it is a no-op.

use core::cell::Cell;
use core::marker::PhantomData;

/// Per-table reentrancy tracker. Table methods start with
/// `let _g = self.reentrancy.enter("<operation>");`.
#[derive(Debug)]
pub(crate) struct TableGuard {
    #[cfg(debug_assertions)]
    active: Cell<Option<&'static str>>,
    // !Send + !Sync, same as the rest of the map.
    _nosend: PhantomData<*mut ()>,
}

impl TableGuard {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Cell::new(None),
            _nosend: PhantomData,
        }
    }

    /// Operation currently holding the guard. Always `None` in release.
    #[cfg(test)]
    pub(crate) fn active(&self) -> Option<&'static str> {
        #[cfg(debug_assertions)]
        {
            self.active.get()
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    }

    /// Enter the guarded section for `op`.
    #[inline]
    pub(crate) fn enter(&self, op: &'static str) -> Entered<'_> {
        #[cfg(debug_assertions)]
        {
            if let Some(outer) = self.active.get() {
                panic!(
                    "reentrancy detected: entry table `{op}` called while `{outer}` is in progress"
                );
            }
            self.active.set(Some(op));
            Entered { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            let _ = op;
            Entered { _z: PhantomData }
        }
    }
}

/// RAII token returned by [`TableGuard::enter`]; releases the guard on drop,
/// including while unwinding out of a panicking callback.
pub(crate) struct Entered<'a> {
    #[cfg(debug_assertions)]
    owner: &'a TableGuard,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(self.owner.active.get().is_some());
            self.owner.active.set(None);
        }
    }
}
