// SyncHashMap / SyncHashSet property tests through the public API.
//
// Property 1: set model equivalence.
//  - Model: std BTreeSet.
//  - Operations: insert, remove, contains, insert_all, remove_all,
//    remove_if (even elements), clone-and-compare.
//  - Invariant: every return value matches the model; len and contents
//    match at the end.
//
// Property 2: equality is order independent and detects any difference.
//  - Build two maps from the same pairs in different orders, with a
//    prefix removed from one and re-inserted; they compare equal.
//  - Changing one value or adding one key makes them unequal.
//
// Property 3: JSON round trip preserves live content.
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use sync_hashmap::{SyncHashMap, SyncHashSet};

#[derive(Clone, Debug)]
enum SetOp {
    Insert(u8),
    Remove(u8),
    Contains(u8),
    InsertAll(Vec<u8>),
    RemoveAll(Vec<u8>),
    RemoveEven,
    CloneEq,
}

fn arb_set_op() -> impl Strategy<Value = SetOp> {
    let elem = 0u8..32;
    prop_oneof![
        4 => elem.clone().prop_map(SetOp::Insert),
        3 => elem.clone().prop_map(SetOp::Remove),
        3 => elem.clone().prop_map(SetOp::Contains),
        1 => proptest::collection::vec(elem.clone(), 0..6).prop_map(SetOp::InsertAll),
        1 => proptest::collection::vec(elem, 0..6).prop_map(SetOp::RemoveAll),
        1 => Just(SetOp::RemoveEven),
        1 => Just(SetOp::CloneEq),
    ]
}

// Property 1: set model equivalence.
proptest! {
    #[test]
    fn prop_set_matches_model(ops in proptest::collection::vec(arb_set_op(), 1..120)) {
        let s: SyncHashSet<u8> = SyncHashSet::new();
        let mut model: BTreeSet<u8> = BTreeSet::new();

        for op in ops {
            match op {
                SetOp::Insert(v) => prop_assert_eq!(s.insert(v), model.insert(v)),
                SetOp::Remove(v) => prop_assert_eq!(s.remove(&v), model.remove(&v)),
                SetOp::Contains(v) => prop_assert_eq!(s.contains(&v), model.contains(&v)),
                SetOp::InsertAll(vs) => {
                    let expected = vs.iter().fold(false, |acc, v| model.insert(*v) || acc);
                    prop_assert_eq!(s.insert_all(vs), expected);
                }
                SetOp::RemoveAll(vs) => {
                    let expected = vs.iter().fold(false, |acc, v| model.remove(v) || acc);
                    prop_assert_eq!(s.remove_all(&vs), expected);
                }
                SetOp::RemoveEven => {
                    let before = model.len();
                    model.retain(|v| v % 2 != 0);
                    prop_assert_eq!(s.remove_if(|v| v % 2 == 0), model.len() != before);
                }
                SetOp::CloneEq => {
                    let c = s.clone();
                    prop_assert!(c == s);
                    let probe = 200u8;
                    c.insert(probe);
                    prop_assert!(c != s);
                    prop_assert!(!s.contains(&probe));
                }
            }
        }

        prop_assert_eq!(s.len(), model.len());
        let got: BTreeSet<u8> = s.to_vec().into_iter().collect();
        prop_assert_eq!(got, model);
    }
}

// Property 2: equality is order independent and detects differences.
proptest! {
    #[test]
    fn prop_equality_order_independent(
        pairs in proptest::collection::btree_map(0u16..500, any::<i32>(), 1..40),
        churn in 0usize..40,
    ) {
        let forward: SyncHashMap<u16, i32> = SyncHashMap::new();
        for (k, v) in &pairs {
            forward.insert(*k, *v);
        }
        let backward: SyncHashMap<u16, i32> = SyncHashMap::new();
        for (k, v) in pairs.iter().rev() {
            backward.insert(*k, *v);
        }
        // Remove then re-insert a prefix so some entries go through the
        // deleted/expunged states before becoming live again.
        for (k, _) in pairs.iter().take(churn) {
            backward.remove(k);
        }
        backward.insert(1_000, 0);
        for (k, v) in pairs.iter().take(churn) {
            backward.insert(*k, *v);
        }
        backward.remove(&1_000);

        prop_assert!(forward == backward);
        prop_assert!(backward == forward);

        let (k0, v0) = pairs.iter().next().map(|(k, v)| (*k, *v)).unwrap();
        backward.insert(k0, v0.wrapping_add(1));
        prop_assert!(forward != backward);
        backward.insert(k0, v0);
        backward.insert(999, 0);
        prop_assert!(forward != backward);
        prop_assert!(backward != forward);
    }
}

// Property 3: JSON round trip preserves live content.
proptest! {
    #[test]
    fn prop_json_round_trip(
        pairs in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..20),
        drop_first in any::<bool>(),
    ) {
        let m: SyncHashMap<String, i64> = pairs.clone().into_iter().collect();
        let mut expected: BTreeMap<String, i64> = pairs;
        if drop_first {
            if let Some(k) = expected.keys().next().cloned() {
                m.remove(k.as_str());
                expected.remove(&k);
            }
        }

        let json = m.to_json().unwrap();
        let back: SyncHashMap<String, i64> = SyncHashMap::from_json(&json).unwrap();
        prop_assert!(back == m);

        let target: SyncHashMap<String, i64> = SyncHashMap::new();
        target.insert("stale".into(), -1);
        target.load_json(&json).unwrap();
        let got: BTreeMap<String, i64> = target.iter().collect();
        prop_assert_eq!(got, expected);
    }
}
