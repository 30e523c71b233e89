//! Weak reference registry: the capability a host memory manager provides.
//!
//! The map never holds its values strongly. For every insert it asks the
//! registry for a weak handle and hands over a [`Notify`]. The host keeps
//! the notify next to its own bookkeeping and fires it once the value is
//! confirmed unreachable; the ticket then lands in the map's inbox and is
//! processed on the map's next turn.

use crate::entry_table::Handle;
use crate::error::Result;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Identity of one weak registration made by a map.
///
/// A ticket names the map that issued it, the entry slot it was issued for
/// and a serial that is unique per map. Maps ignore tickets issued by other
/// maps, and tickets whose serial no longer matches their slot (the key was
/// overwritten or deleted and re-inserted).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Ticket {
    pub(crate) map: u64,
    pub(crate) slot: Handle,
    pub(crate) serial: u64,
}

impl Ticket {
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

type Queue = RefCell<VecDeque<Ticket>>;

thread_local! {
    static NEXT_MAP_ID: Cell<u64> = const { Cell::new(0) };
}

/// Receiving end of finalization notices, owned by the map.
#[derive(Debug)]
pub(crate) struct Inbox {
    id: u64,
    queue: Rc<Queue>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        let id = NEXT_MAP_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        Self {
            id,
            queue: Rc::default(),
        }
    }

    /// Ticket for a registration of `slot` made by this inbox's map.
    pub(crate) fn ticket(&self, slot: Handle, serial: u64) -> Ticket {
        Ticket {
            map: self.id,
            slot,
            serial,
        }
    }

    pub(crate) fn issued(&self, ticket: &Ticket) -> bool {
        ticket.map == self.id
    }

    pub(crate) fn notify(&self, ticket: Ticket) -> Notify {
        Notify {
            ticket,
            inbox: Rc::downgrade(&self.queue),
        }
    }

    /// Take every queued ticket, leaving the queue empty and unborrowed.
    pub(crate) fn take(&self) -> VecDeque<Ticket> {
        core::mem::take(&mut *self.queue.borrow_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub(crate) fn clear(&self) {
        self.queue.borrow_mut().clear();
    }
}

/// Finalization callback for one registration.
///
/// Holds the map's inbox weakly: once the map is dropped, firing is a no-op.
#[derive(Debug)]
pub struct Notify {
    ticket: Ticket,
    inbox: Weak<Queue>,
}

impl Notify {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Whether the map that issued this notify still exists.
    pub fn is_connected(&self) -> bool {
        self.inbox.strong_count() > 0
    }

    /// Deliver the notice. Returns false if the map is gone.
    pub fn fire(self) -> bool {
        match self.inbox.upgrade() {
            Some(queue) => {
                queue.borrow_mut().push_back(self.ticket);
                true
            }
            None => false,
        }
    }
}

/// Host memory manager capability: weak handles plus finalization.
///
/// Implementations must not extend a value's lifetime through the handle
/// or the notify. A host that never fires a notify is correct; the entry
/// just stays until a read or a sweep observes the value as dead.
pub trait WeakRegistry<V> {
    /// Non-owning reference to a value.
    type Handle;

    /// Called once when a map is constructed over this registry.
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Create a weak handle for `value`; `notify` must be fired (at most
    /// once) after the value becomes unreachable.
    fn register(&self, value: &V, notify: Notify) -> Self::Handle;

    /// Obtain a strong reference, or `None` once the value is gone.
    fn resolve(&self, handle: &Self::Handle) -> Option<V>;

    /// Liveness probe that does not need a strong reference.
    fn is_live(&self, handle: &Self::Handle) -> bool {
        self.resolve(handle).is_some()
    }
}
