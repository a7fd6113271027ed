#![cfg(test)]

// Property tests for SyncHashMap kept inside the crate so they can inspect
// the snapshot/overlay bookkeeping through crate-private accessors.

use crate::sync_hash_map::SyncHashMap;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
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

// Pool-indexed operations: indices shrink to earlier keys, pool length
// shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    Replace(usize, i32),
    Remove(usize),
    Get(usize),
    Contains(String),
    Retain(i32),
    Clear,
    Len,
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Replace(i, v)),
            3 => idx.clone().prop_map(OpI::Remove),
            4 => idx.clone().prop_map(OpI::Get),
            2 => prop_oneof![contains_pool, "[a-z]{0,5}"].prop_map(OpI::Contains),
            1 => any::<i32>().prop_map(OpI::Retain),
            1 => Just(OpI::Clear),
            1 => Just(OpI::Len),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Snapshot/overlay bookkeeping that must hold between operations:
// - the snapshot is amended iff an overlay exists;
// - with an overlay, misses stay below its size (otherwise it would have
//   been promoted).
fn check_bookkeeping<S>(sut: &SyncHashMap<Key, i32, S>) -> Result<(), TestCaseError>
where
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    let (amended, overlay, misses) = sut.debug_state();
    prop_assert_eq!(amended, overlay.is_some());
    match overlay {
        Some(len) => prop_assert!(misses < len, "misses {} overlay {}", misses, len),
        None => prop_assert_eq!(misses, 0),
    }
    Ok(())
}

fn run_scenario<S>(
    sut: SyncHashMap<Key, i32, S>,
    pool: Vec<String>,
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    let mut model: HashMap<Key, i32> = HashMap::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(&pool, i);
                prop_assert_eq!(sut.insert(k.clone(), v), model.insert(k, v));
            }
            OpI::Replace(i, v) => {
                let k = key_from(&pool, i);
                let expected = model.get_mut(&k).map(|mv| std::mem::replace(mv, v));
                prop_assert_eq!(sut.replace(&k, v), expected);
            }
            OpI::Remove(i) => {
                let k = key_from(&pool, i);
                prop_assert_eq!(sut.remove(k.0.as_str()), model.remove(&k));
            }
            OpI::Get(i) => {
                let k = key_from(&pool, i);
                prop_assert_eq!(sut.get(&k), model.get(&k).copied());
                prop_assert_eq!(sut.get_or(&k, -1), model.get(&k).copied().unwrap_or(-1));
            }
            OpI::Contains(s) => {
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(sut.contains_key(s.as_str()), has_model);
            }
            OpI::Retain(threshold) => {
                let before = model.len();
                model.retain(|_, v| *v < threshold);
                let removed = sut.retain(|_, v| *v < threshold);
                prop_assert_eq!(removed, model.len() != before);
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
                prop_assert_eq!(sut.debug_state(), (false, None, 0));
            }
            OpI::Len => {
                prop_assert_eq!(sut.len(), model.len());
                prop_assert_eq!(sut.is_empty(), model.is_empty());
                // Aggregates leave no overlay behind.
                prop_assert!(!sut.debug_state().0);
            }
            OpI::Iterate => {
                let s_pairs: BTreeSet<_> = sut.iter().collect();
                let m_pairs: BTreeSet<_> = model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                prop_assert_eq!(s_pairs, m_pairs);
            }
        }
        check_bookkeeping(&sut)?;
    }

    let keys: BTreeSet<_> = sut.keys().into_iter().collect();
    let m_keys: BTreeSet<_> = model.keys().cloned().collect();
    prop_assert_eq!(keys, m_keys);
    prop_assert_eq!(sut.len(), sut.values().len());
    prop_assert_eq!(sut.len(), model.len());
    Ok(())
}

// Property: state-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - insert/replace/remove return the previous value the model reports;
// - get/contains_key agree with the model whether the key sits in the
//   snapshot, only in the overlay, or is deleted/expunged;
// - replace never inserts; retain reports removals exactly;
// - the amended flag, overlay and miss counter stay consistent.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_scenario(SyncHashMap::new(), pool, ops)?;
    }
}

// Collision variant using a constant hasher so every probe resolves by
// equality.
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

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_scenario(SyncHashMap::with_hasher(ConstBuildHasher), pool, ops)?;
    }
}
