//! WeakValueMap: public API over the entry table, registry and reaper.

use crate::entry_table::{EntryTable, Handle};
#[cfg(feature = "reap_logging")]
use crate::entry_table::Upsert;
use crate::error::Result;
use crate::options::Options;
use crate::rc_registry::RcRegistry;
use crate::reaper::Reaper;
use crate::registry::{Ticket, WeakRegistry};
use crate::snapshot::{Iter, Keys, Values};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use std::collections::hash_map::RandomState;
use std::rc::Rc;

/// A hash map that holds its values weakly.
///
/// Values are registered with the registry `R`, which hands back weak
/// handles and later reports values that became unreachable. Entries whose
/// value is gone disappear from `get`/`contains_key` immediately and are
/// physically removed on a later turn.
///
/// `len()` is an upper bound on the number of live values until
/// [`sweep`](Self::sweep) runs.
pub struct WeakValueMap<K, V, R, S = RandomState>
where
    R: WeakRegistry<V>,
{
    table: EntryTable<K, R::Handle, S>,
    registry: R,
    reaper: Reaper,
    options: Options,
    next_serial: u64,
    inserts_since_sweep: usize,
    _values: PhantomData<fn() -> V>,
}

/// Map over `Rc` values with the built-in [`RcRegistry`].
pub type RcWeakValueMap<K, T, S = RandomState> = WeakValueMap<K, Rc<T>, RcRegistry<T>, S>;

impl<K, T> WeakValueMap<K, Rc<T>, RcRegistry<T>>
where
    K: Eq + Hash,
{
    /// Map with its own [`RcRegistry`]; reach it through
    /// [`registry`](Self::registry) to run collection passes.
    pub fn new() -> Self {
        Self::from_parts(RcRegistry::new(), Options::default(), RandomState::new())
    }
}

impl<K, T> Default for WeakValueMap<K, Rc<T>, RcRegistry<T>>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, R> WeakValueMap<K, V, R>
where
    K: Eq + Hash,
    R: WeakRegistry<V>,
{
    /// Build a map over `registry`. Fails if the host cannot hand out weak
    /// references.
    pub fn with_registry(registry: R) -> Result<Self> {
        Self::with_options_and_hasher(registry, Options::default(), RandomState::new())
    }

    pub fn with_options(registry: R, options: Options) -> Result<Self> {
        Self::with_options_and_hasher(registry, options, RandomState::new())
    }
}

impl<K, V, R, S> WeakValueMap<K, V, R, S>
where
    K: Eq + Hash,
    R: WeakRegistry<V>,
    S: BuildHasher,
{
    pub fn with_hasher(registry: R, hasher: S) -> Result<Self> {
        Self::with_options_and_hasher(registry, Options::default(), hasher)
    }

    pub fn with_options_and_hasher(registry: R, options: Options, hasher: S) -> Result<Self> {
        if let Err(err) = registry.check() {
            #[cfg(feature = "reap_logging")]
            tracing::warn!(target: "weak_value_map", error = %err, "cannot build map");
            return Err(err);
        }
        Ok(Self::from_parts(registry, options, hasher))
    }

    fn from_parts(registry: R, options: Options, hasher: S) -> Self {
        Self {
            table: EntryTable::with_capacity_and_hasher(options.capacity, hasher),
            registry,
            reaper: Reaper::new(),
            options,
            next_serial: 0,
            inserts_since_sweep: 0,
            _values: PhantomData,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Start of a mutating turn: apply delivered notices.
    fn write_turn(&mut self) {
        if self.options.reap_on_write {
            self.reaper.reap(&mut self.table);
        } else {
            self.reaper.drain(&self.table);
        }
    }

    /// A read found the value gone before any notice arrived.
    fn observe_dead(&self, h: Handle) {
        if self.table.mark_pending(h, None) {
            self.reaper.bury(&self.table, h);
        }
    }

    /// Number of entries not known to be dead. May overcount values that
    /// died without the map hearing about it yet; exact right after
    /// [`sweep`](Self::sweep).
    pub fn len(&self) -> usize {
        self.reaper.drain(&self.table);
        self.table.live_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map `key` to `value`, replacing any previous value. The map does not
    /// keep `value` alive.
    pub fn insert(&mut self, key: K, value: V) {
        self.write_turn();

        let serial = self.next_serial;
        self.next_serial += 1;
        let registry = &self.registry;
        let reaper = &self.reaper;
        let res = self.table.upsert(key, serial, |slot| {
            registry.register(&value, reaper.notify(reaper.ticket(slot, serial)))
        });
        // The replaced registration's notice carries an old serial and is
        // ignored when it arrives.
        #[cfg(feature = "reap_logging")]
        {
            if let Upsert::Replaced { handle, .. } = &res {
                tracing::trace!(target: "weak_value_map", ?handle, serial, "overwrote entry");
            }
        }
        drop(res);

        if let Some(every) = self.options.sweep_interval {
            self.inserts_since_sweep += 1;
            if self.inserts_since_sweep >= every.get() {
                self.sweep();
            }
        }
    }

    /// The value for `key`, if it is still alive.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.reaper.drain(&self.table);
        let h = self.table.find(key)?;
        let slot = self.table.slot(h)?;
        if slot.is_pending() {
            return None;
        }
        let value = self.registry.resolve(slot.weak());
        if value.is_none() {
            self.observe_dead(h);
        }
        value
    }

    /// Whether `key` maps to a value that is still alive.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.reaper.drain(&self.table);
        let Some(h) = self.table.find(key) else {
            return false;
        };
        let live = match self.table.slot(h) {
            Some(slot) => !slot.is_pending() && self.registry.is_live(slot.weak()),
            None => false,
        };
        if !live {
            self.observe_dead(h);
        }
        live
    }

    /// Remove `key`'s entry whatever the state of its value. Returns true if
    /// the key mapped to a live value.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.write_turn();
        let Some(h) = self.table.find(key) else {
            return false;
        };
        let live = match self.table.slot(h) {
            Some(slot) => !slot.is_pending() && self.registry.is_live(slot.weak()),
            None => false,
        };
        self.table.remove(h);
        live
    }

    pub fn clear(&mut self) {
        self.table.clear();
        self.reaper.clear();
    }

    /// Process delivered finalization notices and drop the entries they
    /// name. Returns the number of entries removed.
    pub fn reap(&mut self) -> usize {
        self.reaper.reap(&mut self.table)
    }

    /// Remove every entry whose value is gone, notified or not. Afterwards
    /// [`len`](Self::len) is exact. Returns the number of entries removed.
    pub fn sweep(&mut self) -> usize {
        self.inserts_since_sweep = 0;
        self.reaper.sweep::<K, V, R, S>(&mut self.table, &self.registry)
    }

    /// Apply a single finalization notice. Tickets issued by another map, and
    /// notices for entries removed or overwritten since the ticket was
    /// issued, are ignored.
    /// Returns whether an entry was marked dead.
    pub fn on_finalize(&self, ticket: Ticket) -> bool {
        self.reaper.on_finalize(&self.table, ticket)
    }

    /// Snapshot of the keys in insertion order. Keys whose value died
    /// without the map noticing yet are included.
    pub fn keys(&self) -> Keys<K>
    where
        K: Clone,
    {
        self.reaper.drain(&self.table);
        Keys::new(
            self.table
                .iter()
                .filter(|(_h, slot)| !slot.is_pending())
                .map(|(_h, slot)| slot.key().clone())
                .collect(),
        )
    }

    /// Snapshot of the live values in insertion order.
    pub fn values(&self) -> Values<V> {
        self.reaper.drain(&self.table);
        let mut out = Vec::with_capacity(self.table.live_len());
        for (h, slot) in self.table.iter() {
            if slot.is_pending() {
                continue;
            }
            match self.registry.resolve(slot.weak()) {
                Some(v) => out.push(v),
                None => self.observe_dead(h),
            }
        }
        Values::new(out)
    }

    /// Snapshot of the live key/value pairs in insertion order.
    pub fn iter(&self) -> Iter<K, V>
    where
        K: Clone,
    {
        self.reaper.drain(&self.table);
        let mut out = Vec::with_capacity(self.table.live_len());
        for (h, slot) in self.table.iter() {
            if slot.is_pending() {
                continue;
            }
            match self.registry.resolve(slot.weak()) {
                Some(v) => out.push((slot.key().clone(), v)),
                None => self.observe_dead(h),
            }
        }
        Iter::new(out)
    }
}

impl<'a, K, V, R, S> IntoIterator for &'a WeakValueMap<K, V, R, S>
where
    K: Eq + Hash + Clone,
    R: WeakRegistry<V>,
    S: BuildHasher,
{
    type Item = (K, V);
    type IntoIter = Iter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, R, S> Extend<(K, V)> for WeakValueMap<K, V, R, S>
where
    K: Eq + Hash,
    R: WeakRegistry<V>,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, R, S> fmt::Debug for WeakValueMap<K, V, R, S>
where
    K: Eq + Hash,
    R: WeakRegistry<V>,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakValueMap")
            .field("entries", &self.table.len())
            .field("pending", &self.table.pending_len())
            .field("queued", &self.reaper.queued())
            .field("buried", &self.reaper.buried())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Obj, SimHeap};

    fn sim_map() -> (SimHeap, WeakValueMap<&'static str, Obj, SimHeap>) {
        let heap = SimHeap::new();
        let map = WeakValueMap::with_registry(heap.clone()).unwrap();
        (heap, map)
    }

    #[test]
    fn dead_value_is_hidden_before_notice_arrives() {
        let (heap, mut map) = sim_map();
        let a = heap.alloc();
        map.insert("a", a);
        heap.unroot(a);
        heap.collect();
        assert_eq!(heap.queued(), 1);

        assert_eq!(map.len(), 1, "nothing observed yet");
        assert_eq!(map.get("a"), None);
        assert_eq!(map.len(), 0, "the failed read marked the entry");
        assert_eq!(map.table.len(), 1, "but did not remove it");

        heap.deliver();
        assert_eq!(map.reap(), 1);
        assert_eq!(map.table.len(), 0);
    }

    #[test]
    fn marking_without_reap_on_write_keeps_slots() {
        let heap = SimHeap::new();
        let mut map = WeakValueMap::with_options(
            heap.clone(),
            Options::new().with_reap_on_write(false),
        )
        .unwrap();
        let a = heap.alloc();
        let b = heap.alloc();
        map.insert("a", a);
        heap.unroot(a);
        heap.gc();
        map.insert("b", b);

        assert_eq!(map.len(), 1);
        assert_eq!(map.table.len(), 2);
        assert_eq!(map.reap(), 1);
        assert_eq!(map.table.len(), 1);
    }

    #[test]
    fn on_finalize_checks_identity() {
        let (heap, mut map) = sim_map();
        let a = heap.alloc();
        map.insert("k", a);
        let h = map.table.find("k").unwrap();
        let first = map.table.slot(h).unwrap().serial();

        let b = heap.alloc();
        map.insert("k", b);
        assert!(!map.on_finalize(map.reaper.ticket(h, first)));
        assert_eq!(map.get("k"), Some(b));

        let second = map.table.slot(h).unwrap().serial();
        assert!(map.on_finalize(map.reaper.ticket(h, second)));
        assert_eq!(map.get("k"), None);
    }

    #[test]
    fn repeated_deaths_without_reaping_keep_graveyard_small() {
        let heap = SimHeap::new();
        let mut map = WeakValueMap::with_options(
            heap.clone(),
            Options::new().with_reap_on_write(false),
        )
        .unwrap();
        for _ in 0..1000 {
            let o = heap.alloc();
            map.insert("k", o);
            heap.unroot(o);
            heap.gc();
        }
        assert_eq!(map.len(), 0);
        assert!(
            map.reaper.buried() <= map.table.len() + 1,
            "graveyard holds {} handles for {} entries",
            map.reaper.buried(),
            map.table.len()
        );
        assert_eq!(map.reap(), 1);
        assert_eq!(map.reaper.buried(), 0);
    }

    #[test]
    fn periodic_sweep_bounds_silent_deaths() {
        let heap = SimHeap::new();
        let mut map =
            WeakValueMap::with_options(heap.clone(), Options::new().with_sweep_interval(4))
                .unwrap();
        for k in ["a", "b", "c"] {
            let o = heap.alloc();
            map.insert(k, o);
            heap.unroot(o);
        }
        // Reclaimed, but notices are never delivered.
        heap.collect();
        assert_eq!(map.table.len(), 3);

        let keep = heap.alloc();
        map.insert("d", keep);
        assert_eq!(map.table.len(), 1);
        assert_eq!(map.keys().collect::<Vec<_>>(), ["d"]);
    }

    #[test]
    fn debug_reports_counts() {
        let (heap, mut map) = sim_map();
        map.insert("a", heap.alloc());
        let s = format!("{:?}", map);
        assert!(s.contains("WeakValueMap"));
        assert!(s.contains("entries: 1"));
    }
}
