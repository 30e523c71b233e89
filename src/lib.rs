//! weak-value-map: a single-threaded hash map whose values are held
//! weakly and whose entries are reaped once the host memory manager has
//! collected the value.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep the map correct no matter when (or whether) the host
//!   reports a dead value, by building it in layers with small contracts.
//! - Layers:
//!   - EntryTable<K, H, S>: structural table with stable generational
//!     handles, an insertion-order list and a per-entry `Live` /
//!     `PendingRemoval` state; includes a debug-only reentrancy guard.
//!   - WeakRegistry<V>: capability supplied by the host. Creates weak
//!     handles, resolves them, and fires a `Notify` once a value is gone.
//!   - Reaper: drains delivered notices, marks entries through `&self`,
//!     and physically removes them on the next `&mut` turn.
//!   - WeakValueMap<K, V, R, S>: public API; every read re-checks liveness
//!     through the registry.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` (Rc and Cell inside, no atomics).
//! - The map never holds a strong reference to a value.
//! - Keys are unique; `keys()` yields insertion order. Overwriting a key
//!   keeps its position.
//! - A dead value is never returned, even before its notice arrives.
//!
//! Finalization notices
//! - Each registration gets a `Ticket { slot, serial }`. Serials increase
//!   per map, so a notice for a value that was since overwritten (or whose
//!   key was removed and re-inserted) no longer matches its slot and is
//!   dropped. This is what keeps `insert(k, a); insert(k, b)` followed by
//!   `a`'s late notice from removing `b`.
//! - A `Notify` holds the map's inbox through `rc::Weak`; firing it after
//!   the map is dropped does nothing.
//! - Notices are processed at the start of the next map operation, never
//!   from inside the host's callback.
//!
//! Reentrancy policy
//! - EntryTable methods only call user code through `K: Eq/Hash` and the
//!   `make_weak` closure of `upsert`. The guard panics in debug builds if
//!   either calls back into the table.
//! - Registry `resolve`/`is_live` run with the table unguarded.
//!
//! Size semantics
//! - `len()` counts entries not yet known to be dead. Values that died
//!   silently are still counted until a read observes them or `sweep()`
//!   probes every entry.
//!
//! Notes and non-goals
//! - No thread-safe variant.
//! - Snapshots (`keys`, `values`, `iter`) own their items and are not
//!   affected by later mutation.

mod entry_table;
#[cfg(test)]
mod entry_table_proptest;
mod error;
mod map;
mod options;
mod rc_registry;
mod reaper;
mod reentrancy;
mod registry;
pub mod sim;
mod snapshot;

// Public surface
pub use error::{Error, Result};
pub use map::{RcWeakValueMap, WeakValueMap};
pub use options::Options;
pub use rc_registry::RcRegistry;
pub use registry::{Notify, Ticket, WeakRegistry};
pub use snapshot::{Iter, Keys, Values};
