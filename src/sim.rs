//! SimHeap: a deterministic stand-in for a garbage-collected host.
//!
//! Objects are explicitly rooted and unrooted; nothing is reclaimed until
//! [`SimHeap::collect`] runs, and finalization notices for reclaimed objects
//! are only handed to their maps by [`SimHeap::deliver`]. Splitting the two
//! lets tests observe the window where a value is dead but the map has not
//! been told yet.
//!
//! ```
//! use weak_value_map::sim::SimHeap;
//! use weak_value_map::WeakValueMap;
//!
//! let heap = SimHeap::new();
//! let mut map = WeakValueMap::with_registry(heap.clone()).unwrap();
//! let obj = heap.alloc();
//! map.insert("x", obj);
//! assert_eq!(map.get("x"), Some(obj));
//!
//! heap.unroot(obj);
//! heap.gc();
//! assert!(!map.contains_key("x"));
//! ```

use crate::error::{Error, Result};
use crate::registry::{Notify, WeakRegistry};
use slotmap::{new_key_type, SlotMap};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

new_key_type! {
    struct ObjKey;
}

/// Reference to a simulated heap object. Copying it does not root it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Obj(ObjKey);

#[derive(Debug)]
struct Object {
    roots: usize,
}

#[derive(Default)]
struct HeapState {
    objects: SlotMap<ObjKey, Object>,
    watches: Vec<(ObjKey, Notify)>,
    queued: VecDeque<Notify>,
    cycles: u64,
}

/// Shared handle to one simulated heap. Clones refer to the same heap.
#[derive(Clone)]
pub struct SimHeap {
    state: Rc<RefCell<HeapState>>,
    weak_refs: bool,
}

impl SimHeap {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(HeapState::default())),
            weak_refs: true,
        }
    }

    /// A heap without a weak-reference primitive; maps refuse to be built
    /// over it.
    pub fn without_weak_refs() -> Self {
        Self {
            weak_refs: false,
            ..Self::new()
        }
    }

    /// Allocate an object holding one root.
    pub fn alloc(&self) -> Obj {
        Obj(self.state.borrow_mut().objects.insert(Object { roots: 1 }))
    }

    /// Add a root. Returns false if the object was already reclaimed.
    pub fn root(&self, obj: Obj) -> bool {
        match self.state.borrow_mut().objects.get_mut(obj.0) {
            Some(o) => {
                o.roots += 1;
                true
            }
            None => false,
        }
    }

    /// Drop a root. Returns false if the object was reclaimed or unrooted.
    pub fn unroot(&self, obj: Obj) -> bool {
        match self.state.borrow_mut().objects.get_mut(obj.0) {
            Some(o) if o.roots > 0 => {
                o.roots -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_alive(&self, obj: Obj) -> bool {
        self.state.borrow().objects.contains_key(obj.0)
    }

    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    /// Reclaim every unrooted object and queue the notices watching them.
    /// Nothing is delivered yet. Returns the number of objects reclaimed.
    pub fn collect(&self) -> usize {
        let mut st = self.state.borrow_mut();
        let st = &mut *st;
        st.cycles += 1;

        let before = st.objects.len();
        st.objects.retain(|_k, o| o.roots > 0);
        let reclaimed = before - st.objects.len();

        let objects = &st.objects;
        let (dead, kept): (Vec<_>, Vec<_>) = core::mem::take(&mut st.watches)
            .into_iter()
            .filter(|(_k, n)| n.is_connected())
            .partition(|(k, _n)| !objects.contains_key(*k));
        st.watches = kept;
        st.queued.extend(dead.into_iter().map(|(_k, n)| n));
        reclaimed
    }

    /// Fire queued notices in the order their objects were found dead.
    /// Returns how many reached a live map.
    pub fn deliver(&self) -> usize {
        let queued = core::mem::take(&mut self.state.borrow_mut().queued);
        queued.into_iter().map(Notify::fire).filter(|&f| f).count()
    }

    /// Collect and deliver in one step. Returns the number reclaimed.
    pub fn gc(&self) -> usize {
        let reclaimed = self.collect();
        self.deliver();
        reclaimed
    }

    /// Notices waiting for [`SimHeap::deliver`].
    pub fn queued(&self) -> usize {
        self.state.borrow().queued.len()
    }

    pub fn cycles(&self) -> u64 {
        self.state.borrow().cycles
    }
}

impl Default for SimHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("SimHeap")
            .field("objects", &st.objects.len())
            .field("watches", &st.watches.len())
            .field("queued", &st.queued.len())
            .field("cycles", &st.cycles)
            .field("weak_refs", &self.weak_refs)
            .finish()
    }
}

impl WeakRegistry<Obj> for SimHeap {
    type Handle = Obj;

    fn check(&self) -> Result<()> {
        if self.weak_refs {
            Ok(())
        } else {
            Err(Error::Unavailable { host: "SimHeap" })
        }
    }

    fn register(&self, value: &Obj, notify: Notify) -> Obj {
        let mut st = self.state.borrow_mut();
        if st.objects.contains_key(value.0) {
            st.watches.push((value.0, notify));
        } else {
            // Already reclaimed: the notice goes out with the next delivery.
            st.queued.push_back(notify);
        }
        *value
    }

    fn resolve(&self, handle: &Obj) -> Option<Obj> {
        self.is_alive(*handle).then_some(*handle)
    }
}
