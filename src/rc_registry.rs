//! Weak registry over `std::rc`: values are `Rc<T>`, handles are `Weak<T>`.
//!
//! `Rc` has no finalization hook, so this registry stands in for the host
//! collector: [`RcRegistry::collect`] walks the watched registrations and
//! fires the notify of every value whose last strong reference is gone.
//! Reads never depend on it; a dead `Weak` fails to upgrade either way.

use crate::registry::{Notify, WeakRegistry};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

struct Watch<T> {
    target: Weak<T>,
    notify: Notify,
}

/// Shared handle to the set of watched `Rc` values. Cloning is cheap and
/// every clone sees the same registrations.
///
/// Maps never cancel a registration. Every insert adds one, and it stays
/// until its value has no strong references left or the issuing map is
/// dropped; the next [`collect`](Self::collect) then releases it. Inserting
/// and removing the same long-lived `Rc` over and over therefore grows
/// [`watched`](Self::watched) by one per insert until that value dies.
/// Releasing a watch is what fires its notice, and the notice for a replaced
/// or removed entry is ignored by the map.
pub struct RcRegistry<T> {
    watches: Rc<RefCell<Vec<Watch<T>>>>,
}

impl<T> RcRegistry<T> {
    pub fn new() -> Self {
        Self {
            watches: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Run one collection pass: fire notices for dead values and forget
    /// registrations whose map has been dropped. Returns the number of
    /// notices delivered.
    pub fn collect(&self) -> usize {
        let dead: Vec<Notify> = {
            let mut watches = self.watches.borrow_mut();
            let (dead, kept): (Vec<_>, Vec<_>) = core::mem::take(&mut *watches)
                .into_iter()
                .filter(|w| w.notify.is_connected())
                .partition(|w| w.target.strong_count() == 0);
            *watches = kept;
            dead.into_iter().map(|w| w.notify).collect()
        };
        // Fire with the registry unborrowed.
        dead.into_iter().map(Notify::fire).filter(|&fired| fired).count()
    }

    /// Registrations still waiting for their value to die.
    pub fn watched(&self) -> usize {
        self.watches.borrow().len()
    }
}

impl<T> Clone for RcRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            watches: Rc::clone(&self.watches),
        }
    }
}

impl<T> Default for RcRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RcRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcRegistry")
            .field("watched", &self.watched())
            .finish()
    }
}

impl<T> WeakRegistry<Rc<T>> for RcRegistry<T> {
    type Handle = Weak<T>;

    fn register(&self, value: &Rc<T>, notify: Notify) -> Weak<T> {
        let target = Rc::downgrade(value);
        self.watches.borrow_mut().push(Watch {
            target: target.clone(),
            notify,
        });
        target
    }

    fn resolve(&self, handle: &Weak<T>) -> Option<Rc<T>> {
        handle.upgrade()
    }

    fn is_live(&self, handle: &Weak<T>) -> bool {
        handle.strong_count() > 0
    }
}
