//! EntryTable: structural layer holding weak entries with stable handles,
//! insertion order and a per-entry liveness state.

use crate::reentrancy::TableGuard;
use core::borrow::Borrow;
use core::cell::Cell;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashTable;
use slotmap::{new_key_type, SlotMap};
use std::collections::hash_map::RandomState;

new_key_type! {
    struct SlotKey;
}

/// Generational position of an entry. A handle never resolves to an entry
/// created after the one it was minted for, even when the slot is reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct Handle(SlotKey);

#[cfg(test)]
impl Handle {
    /// A handle that resolves in no table.
    pub(crate) fn detached() -> Self {
        Handle(SlotKey::default())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum EntryState {
    Live,
    /// The value is known to be gone; the slot waits for compaction.
    PendingRemoval,
}

#[derive(Debug)]
pub(crate) struct Slot<K, H> {
    key: K,
    hash: u64,
    weak: H,
    serial: u64,
    state: Cell<EntryState>,
    prev: Option<SlotKey>,
    next: Option<SlotKey>,
}

impl<K, H> Slot<K, H> {
    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn weak(&self) -> &H {
        &self.weak
    }

    #[cfg(test)]
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state.get() == EntryState::PendingRemoval
    }
}

type Slots<K, H> = SlotMap<SlotKey, Slot<K, H>>;

/// Doubly linked insertion order threaded through the slots.
#[derive(Debug, Default)]
struct Order {
    head: Option<SlotKey>,
    tail: Option<SlotKey>,
}

impl Order {
    fn link_tail<K, H>(&mut self, slots: &mut Slots<K, H>, k: SlotKey) {
        let tail = self.tail;
        if let Some(slot) = slots.get_mut(k) {
            slot.prev = tail;
            slot.next = None;
        }
        match tail.and_then(|t| slots.get_mut(t)) {
            Some(t) => t.next = Some(k),
            None => self.head = Some(k),
        }
        self.tail = Some(k);
    }

    fn unlink<K, H>(&mut self, slots: &mut Slots<K, H>, k: SlotKey) {
        let Some(slot) = slots.get_mut(k) else {
            return;
        };
        let (prev, next) = (slot.prev.take(), slot.next.take());

        match prev.and_then(|p| slots.get_mut(p)) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| slots.get_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
    }
}

/// Outcome of [`EntryTable::upsert`].
#[derive(Debug)]
pub(crate) enum Upsert<H> {
    Inserted(Handle),
    /// The key was already present: the stored key and its position are
    /// kept, the previous weak handle is handed back.
    Replaced { handle: Handle, old: H },
}

pub(crate) struct EntryTable<K, H, S = RandomState> {
    hasher: S,
    index: HashTable<SlotKey>,
    slots: Slots<K, H>,
    order: Order,
    pending: Cell<usize>,
    reentrancy: TableGuard,
}

impl<K, H, S> EntryTable<K, H, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::with_capacity(capacity),
            slots: SlotMap::with_capacity_and_key(capacity),
            order: Order::default(),
            pending: Cell::new(0),
            reentrancy: TableGuard::new(),
        }
    }

    /// Number of entries physically present, dead or alive.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Entries not yet known to be dead. Upper bound on the live count.
    pub(crate) fn live_len(&self) -> usize {
        self.slots.len() - self.pending.get()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.get()
    }

    pub(crate) fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("find");
        let hash = self.hasher.hash_one(q);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|s| s.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle(k))
    }

    #[cfg(test)]
    pub(crate) fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).is_some()
    }

    /// Insert `key` or overwrite its entry. `make_weak` receives the handle of
    /// the slot the weak reference is being created for; it runs while the
    /// table is guarded and must not call back into it.
    pub(crate) fn upsert<F>(&mut self, key: K, serial: u64, make_weak: F) -> Upsert<H>
    where
        F: FnOnce(Handle) -> H,
    {
        let _g = self.reentrancy.enter("upsert");
        let hash = self.hasher.hash_one(&key);
        match self.index.entry(
            hash,
            |&kk| self.slots.get(kk).map(|s| s.key == key).unwrap_or(false),
            |&kk| self.slots.get(kk).map(|s| s.hash).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(o) => {
                let k = *o.get();
                let weak = make_weak(Handle(k));
                let slot = &mut self.slots[k];
                let old = core::mem::replace(&mut slot.weak, weak);
                slot.serial = serial;
                if slot.state.replace(EntryState::Live) == EntryState::PendingRemoval {
                    self.pending.set(self.pending.get() - 1);
                }
                Upsert::Replaced {
                    handle: Handle(k),
                    old,
                }
            }
            hashbrown::hash_table::Entry::Vacant(v) => {
                let k = self.slots.insert_with_key(|k| Slot {
                    key,
                    hash,
                    weak: make_weak(Handle(k)),
                    serial,
                    state: Cell::new(EntryState::Live),
                    prev: None,
                    next: None,
                });
                let _ = v.insert(k);
                self.order.link_tail(&mut self.slots, k);
                Upsert::Inserted(Handle(k))
            }
        }
    }

    pub(crate) fn slot(&self, h: Handle) -> Option<&Slot<K, H>> {
        let _g = self.reentrancy.enter("slot");
        self.slots.get(h.0)
    }

    /// Move an entry to `PendingRemoval`. With `Some(serial)` the transition
    /// only happens if the entry still carries that registration. Returns
    /// true if the entry was newly marked.
    pub(crate) fn mark_pending(&self, h: Handle, serial: Option<u64>) -> bool {
        let _g = self.reentrancy.enter("mark_pending");
        let Some(slot) = self.slots.get(h.0) else {
            return false;
        };
        if serial.is_some_and(|s| s != slot.serial) || slot.is_pending() {
            return false;
        }
        slot.state.set(EntryState::PendingRemoval);
        self.pending.set(self.pending.get() + 1);
        true
    }

    pub(crate) fn remove(&mut self, h: Handle) -> Option<(K, H)> {
        let _g = self.reentrancy.enter("remove");
        let k = h.0;
        if !self.slots.contains_key(k) {
            return None;
        }

        self.order.unlink(&mut self.slots, k);
        let slot = self.slots.remove(k)?;
        let _ = self
            .index
            .find_entry(slot.hash, |&kk| kk == k)
            .map(|entry| entry.remove());
        if slot.is_pending() {
            self.pending.set(self.pending.get() - 1);
        }

        Some((slot.key, slot.weak))
    }

    pub(crate) fn clear(&mut self) {
        let _g = self.reentrancy.enter("clear");
        self.index.clear();
        self.slots.clear();
        self.order = Order::default();
        self.pending.set(0);
    }

    /// Entries in insertion order.
    pub(crate) fn iter(&self) -> OrderIter<'_, K, H> {
        OrderIter {
            slots: &self.slots,
            cursor: self.order.head,
            remaining: self.slots.len(),
        }
    }
}

pub(crate) struct OrderIter<'a, K, H> {
    slots: &'a Slots<K, H>,
    cursor: Option<SlotKey>,
    remaining: usize,
}

impl<'a, K, H> Iterator for OrderIter<'a, K, H> {
    type Item = (Handle, &'a Slot<K, H>);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let k = self.cursor?;
        let slot = self.slots.get(k)?;
        self.cursor = slot.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((Handle(k), slot))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
