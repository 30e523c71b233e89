#![cfg(test)]

// Property tests for EntryTable kept inside the crate so they can reach the
// crate-private table and handle types.

use crate::entry_table::{EntryTable, Handle, Upsert};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug)]
enum MarkBy {
    CurrentSerial,
    OlderSerial,
    Unchecked,
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Upsert(usize, u32),
    Remove(usize),
    Mark(usize, MarkBy),
    Find(usize),
    Contains(String),
    Iterate,
}

#[derive(Debug)]
struct ModelEntry {
    key: Key,
    weak: u32,
    serial: u64,
    pending: bool,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let mark_by = prop_oneof![
            Just(MarkBy::CurrentSerial),
            Just(MarkBy::OlderSerial),
            Just(MarkBy::Unchecked),
        ];
        let op = prop_oneof![
            3 => (idx.clone(), any::<u32>()).prop_map(|(i, v)| OpI::Upsert(i, v)),
            1 => idx.clone().prop_map(OpI::Remove),
            2 => (idx.clone(), mark_by).prop_map(|(i, m)| OpI::Mark(i, m)),
            1 => idx.clone().prop_map(OpI::Find),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,4}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// State-machine equivalence against an insertion-ordered Vec model.
// Invariants exercised across random operation sequences:
// - Keys stay unique; an upsert of a present key replaces the weak handle in
//   place, returns the previous one, and clears a pending mark.
// - `find`/`contains_key` parity and handle stability for present entries.
// - `mark_pending` only succeeds with a matching (or unchecked) serial and
//   only once per registration; pending counts match the model.
// - `iter` yields entries in insertion order with their current serials.
// - Removed handles never resolve again.
fn run_state_machine<S: BuildHasher>(
    mut sut: EntryTable<Key, u32, S>,
    pool: Vec<String>,
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: Vec<ModelEntry> = Vec::new();
    let mut live: HashMap<Key, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();
    let mut next_serial = 0u64;

    for op in ops {
        match op {
            OpI::Upsert(i, v) => {
                let k = key_from(&pool, i);
                let serial = next_serial;
                next_serial += 1;
                let pos = model.iter().position(|e| e.key == k);
                match (sut.upsert(k.clone(), serial, |_| v), pos) {
                    (Upsert::Inserted(h), None) => {
                        prop_assert!(live.insert(k.clone(), h).is_none());
                        model.push(ModelEntry {
                            key: k,
                            weak: v,
                            serial,
                            pending: false,
                        });
                    }
                    (Upsert::Replaced { handle, old }, Some(p)) => {
                        prop_assert_eq!(Some(&handle), live.get(&k));
                        let e = &mut model[p];
                        prop_assert_eq!(old, e.weak);
                        e.weak = v;
                        e.serial = serial;
                        e.pending = false;
                    }
                    (res, pos) => {
                        prop_assert!(false, "upsert returned {:?} with model position {:?}", res, pos);
                    }
                }
            }
            OpI::Remove(i) => {
                let k = key_from(&pool, i);
                if let Some(h) = live.remove(&k) {
                    let (kk, w) = sut.remove(h).expect("handle valid for removal");
                    prop_assert_eq!(&kk, &k);
                    let p = model.iter().position(|e| e.key == k).expect("present in model");
                    let e = model.remove(p);
                    prop_assert_eq!(w, e.weak);
                    stale.push(h);
                } else {
                    prop_assert!(sut.find(&k).is_none());
                }
            }
            OpI::Mark(i, by) => {
                let k = key_from(&pool, i);
                if let Some(&h) = live.get(&k) {
                    let e = model.iter_mut().find(|e| e.key == k).expect("present in model");
                    let serial = match by {
                        MarkBy::CurrentSerial => Some(e.serial),
                        MarkBy::OlderSerial => Some(e.serial.wrapping_sub(1)),
                        MarkBy::Unchecked => None,
                    };
                    let expected = !e.pending && !matches!(by, MarkBy::OlderSerial);
                    prop_assert_eq!(sut.mark_pending(h, serial), expected);
                    if expected {
                        e.pending = true;
                    }
                    prop_assert_eq!(sut.slot(h).map(|s| s.is_pending()), Some(e.pending));
                }
            }
            OpI::Find(i) => {
                let k = key_from(&pool, i);
                let s = sut.find(&k);
                prop_assert_eq!(s.is_some(), live.contains_key(&k));
                if let Some(h) = s {
                    prop_assert_eq!(Some(&h), live.get(&k));
                }
            }
            OpI::Contains(s) => {
                let has_model = model.iter().any(|e| e.key.0 == s);
                prop_assert_eq!(sut.contains_key(s.as_str()), has_model);
            }
            OpI::Iterate => {
                let s_entries: Vec<(Key, u64)> = sut
                    .iter()
                    .map(|(_h, slot)| (slot.key().clone(), slot.serial()))
                    .collect();
                let m_entries: Vec<(Key, u64)> =
                    model.iter().map(|e| (e.key.clone(), e.serial)).collect();
                prop_assert_eq!(s_entries, m_entries);
            }
        }

        // Post-conditions after each op
        for &h in &stale {
            prop_assert!(sut.slot(h).is_none());
        }
        let pending = model.iter().filter(|e| e.pending).count();
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.pending_len(), pending);
        prop_assert_eq!(sut.live_len(), model.len() - pending);
        let order: Vec<&Key> = sut.iter().map(|(_h, slot)| slot.key()).collect();
        let m_order: Vec<&Key> = model.iter().map(|e| &e.key).collect();
        prop_assert_eq!(order, m_order);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine(EntryTable::with_capacity_and_hasher(0, RandomState::new()), pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Same invariants under worst-case collisions (constant hasher).
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_state_machine(EntryTable::with_capacity_and_hasher(0, ConstBuildHasher), pool, ops)?;
    }
}
