//! SyncHashSet: a `SyncHashMap` keyed by element with a unit value.
//!
//! Every operation maps onto the underlying map, so the set inherits its
//! read/write/promote protocol unchanged. `remove_if` and `retain_all` scan
//! a forced present view and delete matches one by one; elements inserted
//! by other threads during the scan may or may not be visited.

use crate::error::Result;
use crate::sync_hash_map::{Iter, SyncHashMap};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use crossbeam_epoch as epoch;
use hashbrown::HashSet;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::hash_map::RandomState;

/// A concurrent, read-optimized hash set. See [`SyncHashMap`] for the
/// concurrency guarantees.
pub struct SyncHashSet<T, S = RandomState> {
    map: SyncHashMap<T, (), S>,
}

impl<T> SyncHashSet<T> {
    pub fn new() -> Self {
        Self {
            map: SyncHashMap::new(),
        }
    }
}

impl<T, S: Default + Clone> Default for SyncHashSet<T, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<T, S: Clone> SyncHashSet<T, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            map: SyncHashMap::with_hasher(hasher),
        }
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            map: SyncHashMap::with_capacity_and_hasher(capacity, hasher),
        }
    }
}

impl<T, S> SyncHashSet<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Add `value`. Returns true if it was not already present.
    pub fn insert(&self, value: T) -> bool {
        self.map.insert(value, ()).is_none()
    }

    /// Add every element of `values`. Returns true if any was new.
    pub fn insert_all<I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        values
            .into_iter()
            .fold(false, |changed, v| self.insert(v) || changed)
    }

    /// Remove `value`. Returns true if it was present.
    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.map.remove(value).is_some()
    }

    /// Remove every element of `values`. Returns true if any was present.
    pub fn remove_all<'a, Q, I>(&self, values: I) -> bool
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq + 'a,
        I: IntoIterator<Item = &'a Q>,
    {
        values
            .into_iter()
            .fold(false, |changed, v| self.remove(v) || changed)
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.map.contains_key(value)
    }

    /// True if every element of `values` is present. Checked against a
    /// single present view.
    pub fn contains_all<'a, Q, I>(&self, values: I) -> bool
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq + 'a,
        I: IntoIterator<Item = &'a Q>,
    {
        let table = self.map.present();
        let guard = &epoch::pin();
        values
            .into_iter()
            .all(|v| table.get(v).map_or(false, |e| e.load(guard).is_some()))
    }

    /// Remove every element for which `f` returns true. Returns whether
    /// anything was removed. Best effort; see the module docs.
    pub fn remove_if<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        self.map.retain(|k, _| !f(k))
    }

    /// Keep only elements contained in `values`. Returns whether anything
    /// was removed. Best effort; see the module docs.
    pub fn retain_all<'a, I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = &'a T>,
    {
        let keep: HashSet<&T> = values.into_iter().collect();
        self.map.retain(|k, _| keep.contains(k))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear()
    }

    /// Call `f` for every element until it returns an error, which is
    /// returned unchanged.
    pub fn for_each<F, E>(&self, mut f: F) -> core::result::Result<(), E>
    where
        F: FnMut(&T) -> core::result::Result<(), E>,
    {
        self.map.for_each(|k, _| f(k))
    }

    pub fn iter(&self) -> SetIter<T> {
        SetIter {
            inner: self.map.iter(),
        }
    }

    pub fn to_json(&self) -> Result<String>
    where
        T: Serialize,
    {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json<'de>(input: &'de str) -> Result<Self>
    where
        T: Deserialize<'de>,
        S: Default,
    {
        Ok(serde_json::from_str(input)?)
    }

    /// Replace the content with the JSON array in `input`. The payload is
    /// parsed in full first; on error the set is left untouched.
    pub fn load_json<'de>(&self, input: &'de str) -> Result<()>
    where
        T: Deserialize<'de>,
    {
        let items: Vec<T> = serde_json::from_str(input)?;
        self.map.install(items.into_iter().map(|v| (v, ())));
        Ok(())
    }
}

/// Lazy iterator over a set's elements; see [`SyncHashMap::iter`].
pub struct SetIter<T> {
    inner: Iter<T, ()>,
}

impl<T> Iterator for SetIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next().map(|(k, ())| k)
    }
}

impl<T, S> Clone for SyncHashSet<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<T, S> PartialEq for SyncHashSet<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<T, S> Eq for SyncHashSet<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
}

impl<T, S> fmt::Debug for SyncHashSet<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.map.present();
        let guard = &epoch::pin();
        f.debug_set()
            .entries(
                table
                    .iter()
                    .filter(|(_, e)| e.load(guard).is_some())
                    .map(|(k, _)| k),
            )
            .finish()
    }
}

impl<T, S> FromIterator<T> for SyncHashSet<T, S>
where
    T: Eq + Hash,
    S: BuildHasher + Clone + Default,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().map(|v| (v, ())).collect(),
        }
    }
}

impl<T, S> Extend<T> for SyncHashSet<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.insert_all(iter);
    }
}

impl<T, S> Serialize for SyncHashSet<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + Serialize + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> core::result::Result<Ser::Ok, Ser::Error> {
        let table = self.map.present();
        let guard = &epoch::pin();
        let mut out = serializer.serialize_seq(None)?;
        for (k, e) in table.iter() {
            if e.load(guard).is_some() {
                out.serialize_element(k)?;
            }
        }
        out.end()
    }
}

impl<'de, T, S> Deserialize<'de> for SyncHashSet<T, S>
where
    T: Eq + Hash + Deserialize<'de>,
    S: BuildHasher + Clone + Default,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let items: Vec<T> = Vec::deserialize(deserializer)?;
        Ok(items.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: `insert` reports whether the element was new, including
    /// after a removal.
    #[test]
    fn insert_reports_novelty() {
        let s: SyncHashSet<&'static str> = SyncHashSet::new();
        assert!(s.insert("a"));
        assert!(!s.insert("a"));
        assert!(s.remove("a"));
        assert!(!s.remove("a"));
        assert!(s.insert("a"));
        assert_eq!(s.len(), 1);
    }

    /// Invariant: bulk operations report whether anything changed.
    #[test]
    fn bulk_insert_and_remove() {
        let s: SyncHashSet<i32> = SyncHashSet::new();
        assert!(s.insert_all([1, 2, 3]));
        assert!(!s.insert_all([1, 2]));
        assert!(s.insert_all([3, 4]));
        assert!(s.contains_all(&[1, 2, 3, 4]));
        assert!(!s.contains_all(&[1, 5]));
        assert!(s.contains_all::<i32, _>(&[]));

        assert!(s.remove_all(&[1, 9]));
        assert!(!s.remove_all(&[1, 9]));
        let mut left = s.to_vec();
        left.sort();
        assert_eq!(left, vec![2, 3, 4]);
    }

    /// Invariant: `remove_if` and `retain_all` delete exactly the matching
    /// elements of a quiescent set.
    #[test]
    fn predicate_removal() {
        let s: SyncHashSet<i32> = (0..10).collect();
        assert!(s.remove_if(|v| v % 2 == 0));
        assert!(!s.remove_if(|v| v % 2 == 0));
        let mut odd = s.to_vec();
        odd.sort();
        assert_eq!(odd, vec![1, 3, 5, 7, 9]);

        assert!(s.retain_all(&[1, 3, 42]));
        assert!(!s.retain_all(&[1, 3]));
        let mut kept = s.to_vec();
        kept.sort();
        assert_eq!(kept, vec![1, 3]);
        assert!(!s.contains(&42));
    }

    /// Invariant: JSON export lists live elements; a malformed payload leaves
    /// the set unchanged.
    #[test]
    fn json_array_round() {
        let s: SyncHashSet<i32> = SyncHashSet::new();
        s.insert(7);
        assert_eq!(s.to_json().unwrap(), "[7]");
        assert!(s.load_json("[1, 2, \"x\"]").is_err());
        assert!(s.contains(&7));
        s.load_json("[1, 2, 2]").unwrap();
        assert_eq!(s.len(), 2);
        assert!(!s.contains(&7));
    }

    /// Invariant: a handler error stops iteration and is returned verbatim.
    #[test]
    fn for_each_propagates_error() {
        let s: SyncHashSet<i32> = (0..5).collect();
        let mut calls = 0;
        let res = s.for_each(|_| {
            calls += 1;
            if calls == 2 {
                Err("stop")
            } else {
                Ok(())
            }
        });
        assert_eq!(res, Err("stop"));
        assert_eq!(calls, 2);
    }
}
