//! Reaper: turns finalization notices into entry removals.
//!
//! Work is split in two so that `&self` reads can take part:
//! - marking (`drain`, `on_finalize`, `bury`) only flips an entry's state
//!   cell and records its handle in the graveyard;
//! - compaction (`compact`, `sweep`) needs `&mut` and physically removes
//!   entries that are still marked.

use crate::entry_table::{EntryTable, Handle};
use crate::registry::{Inbox, Notify, Ticket, WeakRegistry};
use core::cell::RefCell;
use core::hash::{BuildHasher, Hash};

#[derive(Debug)]
pub(crate) struct Reaper {
    inbox: Inbox,
    graveyard: RefCell<Vec<Handle>>,
}

impl Reaper {
    pub(crate) fn new() -> Self {
        Self {
            inbox: Inbox::new(),
            graveyard: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn ticket(&self, slot: Handle, serial: u64) -> Ticket {
        self.inbox.ticket(slot, serial)
    }

    pub(crate) fn notify(&self, ticket: Ticket) -> Notify {
        self.inbox.notify(ticket)
    }

    /// Tickets delivered but not yet drained.
    pub(crate) fn queued(&self) -> usize {
        self.inbox.len()
    }

    /// Handles marked but not yet compacted. May include stale handles.
    pub(crate) fn buried(&self) -> usize {
        self.graveyard.borrow().len()
    }

    /// Record a newly marked entry for compaction. An entry that is marked,
    /// overwritten and marked again is buried twice, so once the graveyard
    /// outgrows the table it is deduplicated and stripped of entries that
    /// are no longer pending. Its length stays within `table.len() + 1`.
    pub(crate) fn bury<K, H, S>(&self, table: &EntryTable<K, H, S>, h: Handle)
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        let mut graveyard = self.graveyard.borrow_mut();
        graveyard.push(h);
        if graveyard.len() > table.len() {
            graveyard.sort_unstable();
            graveyard.dedup();
            graveyard.retain(|&h| table.slot(h).is_some_and(|s| s.is_pending()));
        }
    }

    /// Process one notice. Ignored unless this map issued the ticket and the
    /// slot still carries the registration it names.
    pub(crate) fn on_finalize<K, H, S>(
        &self,
        table: &EntryTable<K, H, S>,
        ticket: Ticket,
    ) -> bool
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        if self.inbox.issued(&ticket) && table.mark_pending(ticket.slot, Some(ticket.serial)) {
            self.bury(table, ticket.slot);
            true
        } else {
            #[cfg(feature = "reap_logging")]
            tracing::trace!(
                target: "weak_value_map",
                serial = ticket.serial,
                "finalization notice ignored: foreign, stale or already marked"
            );
            false
        }
    }

    /// Mark every entry named by a queued notice. Returns how many matched.
    pub(crate) fn drain<K, H, S>(&self, table: &EntryTable<K, H, S>) -> usize
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        let tickets = self.inbox.take();
        tickets
            .into_iter()
            .filter(|&t| self.on_finalize(table, t))
            .count()
    }

    /// Remove buried entries that are still marked. An entry overwritten
    /// after being marked is live again and stays.
    pub(crate) fn compact<K, H, S>(&self, table: &mut EntryTable<K, H, S>) -> usize
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        let buried = core::mem::take(&mut *self.graveyard.borrow_mut());
        let mut removed = 0;
        for h in buried {
            let still_dead = table.slot(h).is_some_and(|s| s.is_pending());
            if still_dead && table.remove(h).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub(crate) fn reap<K, H, S>(&self, table: &mut EntryTable<K, H, S>) -> usize
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        let notified = self.drain(table);
        let removed = self.compact(table);
        #[cfg(feature = "reap_logging")]
        {
            if removed > 0 {
                tracing::debug!(
                    target: "weak_value_map",
                    notified,
                    removed,
                    remaining = table.len(),
                    "reaped dead entries"
                );
            }
        }
        #[cfg(not(feature = "reap_logging"))]
        let _ = notified;
        removed
    }

    /// Reap, then probe every remaining entry and drop the dead ones.
    /// Afterwards the table holds only entries that were live at the probe.
    pub(crate) fn sweep<K, V, R, S>(
        &self,
        table: &mut EntryTable<K, R::Handle, S>,
        registry: &R,
    ) -> usize
    where
        K: Eq + Hash,
        R: WeakRegistry<V>,
        S: BuildHasher,
    {
        let reaped = self.reap(table);
        let dead: Vec<Handle> = table
            .iter()
            .filter(|(_h, slot)| !registry.is_live(slot.weak()))
            .map(|(h, _slot)| h)
            .collect();
        let probed = dead.into_iter().filter_map(|h| table.remove(h)).count();
        #[cfg(feature = "reap_logging")]
        tracing::debug!(
            target: "weak_value_map",
            reaped,
            probed,
            remaining = table.len(),
            "sweep finished"
        );
        reaped + probed
    }

    pub(crate) fn clear(&self) {
        self.inbox.clear();
        self.graveyard.borrow_mut().clear();
    }
}
