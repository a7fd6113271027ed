//! SyncHashMap: read snapshot + dirty overlay behind one writer lock.
//!
//! Readers load the current `ReadOnly` snapshot through an epoch-protected
//! atomic pointer and never block on hits. Keys that are not yet in the
//! snapshot live in the dirty overlay, guarded by the map mutex together
//! with the miss counter. Once enough lookups had to fall back to the
//! overlay (misses >= overlay size), the overlay is published as the new
//! snapshot.
//!
//! Invariants (all checked under the mutex):
//! - `amended == false` implies the overlay is absent and the snapshot is
//!   the complete key set.
//! - `amended == true` implies the overlay holds every non-expunged
//!   snapshot entry plus any newer keys.
//! - An entry is expunged only while an overlay exists, and an expunged
//!   entry is never in the overlay.
//! - The snapshot pointer is only stored with the mutex held.

use crate::entry::Entry;
use crate::error::Result;
use crate::reentrancy::{DebugReentrancy, ReentrancyGuard};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ops::{Deref, DerefMut};
use core::sync::atomic::Ordering;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned};
use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::hash_map::RandomState;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) type Table<K, V, S> = HashMap<K, Arc<Entry<V>>, S>;

struct ReadOnly<K, V, S> {
    map: Arc<Table<K, V, S>>,
    amended: bool,
}

struct Dirty<K, V, S> {
    map: Option<Table<K, V, S>>,
    misses: usize,
}

/// Overlay state plus the reentrancy marker; the marker is released first.
struct Locked<'a, K, V, S> {
    _reentrancy: ReentrancyGuard<'a>,
    dirty: MutexGuard<'a, Dirty<K, V, S>>,
}

impl<K, V, S> Deref for Locked<'_, K, V, S> {
    type Target = Dirty<K, V, S>;
    fn deref(&self) -> &Self::Target {
        &self.dirty
    }
}

impl<K, V, S> DerefMut for Locked<'_, K, V, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.dirty
    }
}

/// An entry found either in the snapshot (borrowed for the guard's
/// lifetime) or in the overlay (kept alive by its own `Arc`).
enum Located<'g, V> {
    Read(&'g Entry<V>),
    Dirty(Arc<Entry<V>>),
}

impl<V> Deref for Located<'_, V> {
    type Target = Entry<V>;
    fn deref(&self) -> &Entry<V> {
        match self {
            Located::Read(e) => *e,
            Located::Dirty(e) => &**e,
        }
    }
}

/// A concurrent, read-optimized hash map.
///
/// All methods take `&self` and may be called from any number of threads.
/// Lookups and updates of keys already in the read snapshot are lock-free;
/// inserting new keys, resolving overlay misses and promotion take the map
/// mutex. Aggregate operations (`len`, `keys`, `for_each`, ...) first force
/// a pending promotion so they observe a single, untorn key set.
pub struct SyncHashMap<K, V, S = RandomState> {
    read: Atomic<ReadOnly<K, V, S>>,
    dirty: Mutex<Dirty<K, V, S>>,
    reentrancy: DebugReentrancy,
    hasher: S,
}

impl<K, V> SyncHashMap<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V, S: Default + Clone> Default for SyncHashMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> SyncHashMap<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self
    where
        S: Clone,
    {
        Self::with_capacity_and_hasher(0, hasher)
    }

    /// Create an empty map whose first snapshot has room for `capacity` keys.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self
    where
        S: Clone,
    {
        let table = HashMap::with_capacity_and_hasher(capacity, hasher.clone());
        Self::from_table(table, hasher)
    }

    fn from_table(table: Table<K, V, S>, hasher: S) -> Self {
        Self {
            read: Atomic::new(ReadOnly {
                map: Arc::new(table),
                amended: false,
            }),
            dirty: Mutex::new(Dirty {
                map: None,
                misses: 0,
            }),
            reentrancy: DebugReentrancy::new(),
            hasher,
        }
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }
}

impl<K, V, S> SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn load_read<'g>(&self, guard: &'g Guard) -> &'g ReadOnly<K, V, S> {
        // SAFETY: `read` is never null, and replaced snapshots are retired
        // through the epoch, so the pointee outlives `guard`.
        unsafe { self.read.load(Ordering::Acquire, guard).deref() }
    }

    fn lock(&self) -> Locked<'_, K, V, S> {
        self.reentrancy.check();
        let dirty = self.dirty.lock();
        Locked {
            _reentrancy: self.reentrancy.enter(),
            dirty,
        }
    }

    /// Replace the snapshot. The mutex must be held.
    fn publish(&self, map: Arc<Table<K, V, S>>, amended: bool, guard: &Guard) {
        let prev = self
            .read
            .swap(Owned::new(ReadOnly { map, amended }), Ordering::AcqRel, guard);
        // SAFETY: `prev` is unlinked; readers that loaded it are pinned.
        unsafe { guard.defer_destroy(prev) };
    }

    fn new_table(&self, capacity: usize) -> Table<K, V, S> {
        HashMap::with_capacity_and_hasher(capacity, self.hasher.clone())
    }

    /// Make sure the overlay exists, copying live snapshot entries into it
    /// and expunging deleted ones. Publishes the amended snapshot when the
    /// overlay is created.
    fn dirty_locked<'d>(
        &self,
        dirty: &'d mut Dirty<K, V, S>,
        read: &ReadOnly<K, V, S>,
        guard: &Guard,
    ) -> &'d mut Table<K, V, S> {
        let map = match dirty.map.take() {
            Some(map) => map,
            None => {
                let mut map = self.new_table(read.map.len());
                let mut expunged = 0usize;
                for (k, e) in read.map.iter() {
                    if e.try_expunge_locked(guard) {
                        expunged += 1;
                    } else {
                        map.insert(k.clone(), Arc::clone(e));
                    }
                }
                trace!(copied = map.len(), expunged, "materialized dirty overlay");
                self.publish(Arc::clone(&read.map), true, guard);
                map
            }
        };
        dirty.map.insert(map)
    }

    /// Publish the overlay as the new, unamended snapshot.
    fn promote_locked(&self, dirty: &mut Dirty<K, V, S>, guard: &Guard) -> Arc<Table<K, V, S>> {
        let map = match dirty.map.take() {
            Some(map) => Arc::new(map),
            None => Arc::clone(&self.load_read(guard).map),
        };
        trace!(entries = map.len(), misses = dirty.misses, "promoting dirty overlay");
        dirty.misses = 0;
        self.publish(Arc::clone(&map), false, guard);
        map
    }

    fn miss_locked(&self, dirty: &mut Dirty<K, V, S>, guard: &Guard) {
        dirty.misses += 1;
        let overlay = dirty.map.as_ref().map_or(0, |m| m.len());
        if dirty.misses < overlay {
            return;
        }
        self.promote_locked(dirty, guard);
    }

    /// Find the entry for `key`, falling back to the overlay (and counting a
    /// miss) when the snapshot is amended. With `unlink`, an overlay hit is
    /// also removed from the overlay.
    fn locate<'g, Q>(&self, key: &Q, unlink: bool, guard: &'g Guard) -> Option<Located<'g, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let read = self.load_read(guard);
        if let Some(e) = read.map.get(key) {
            return Some(Located::Read(&**e));
        }
        if !read.amended {
            return None;
        }

        let mut locked = self.lock();
        let read = self.load_read(guard);
        if let Some(e) = read.map.get(key) {
            return Some(Located::Read(&**e));
        }
        if !read.amended {
            return None;
        }
        let found = match locked.map.as_mut() {
            Some(m) if unlink => m.remove(key),
            Some(m) => m.get(key).cloned(),
            None => None,
        };
        self.miss_locked(&mut locked, guard);
        found.map(Located::Dirty)
    }

    /// Snapshot table after forcing any pending promotion.
    pub(crate) fn present(&self) -> Arc<Table<K, V, S>> {
        let guard = &epoch::pin();
        let read = self.load_read(guard);
        if !read.amended {
            return Arc::clone(&read.map);
        }
        let mut locked = self.lock();
        let read = self.load_read(guard);
        if !read.amended {
            return Arc::clone(&read.map);
        }
        debug!("forcing promotion for an aggregate view");
        self.promote_locked(&mut locked, guard)
    }

    /// Atomically replace the whole content with `pairs`.
    pub(crate) fn install<I>(&self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut table = self.new_table(0);
        for (k, v) in pairs {
            table.insert(k, Arc::new(Entry::new(v)));
        }
        let guard = &epoch::pin();
        let mut locked = self.lock();
        debug!(entries = table.len(), "replacing map content");
        locked.map = None;
        locked.misses = 0;
        self.publish(Arc::new(table), false, guard);
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let guard = &epoch::pin();
        let entry = self.locate(key, false, guard)?;
        entry.load(guard).cloned()
    }

    /// Value for `key`, or `default` if the key is absent.
    pub fn get_or<Q>(&self, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(key).unwrap_or(default)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let guard = &epoch::pin();
        self.locate(key, false, guard)
            .map_or(false, |e| e.load(guard).is_some())
    }

    /// Associate `value` with `key`, returning the previous value if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let guard = &epoch::pin();
        let read = self.load_read(guard);
        let value = match read.map.get(&key) {
            Some(e) => match e.try_swap(value, guard) {
                Ok(old) => return old.cloned(),
                Err(value) => value,
            },
            None => value,
        };
        self.insert_locked(key, value, guard)
    }

    fn insert_locked(&self, key: K, value: V, guard: &Guard) -> Option<V> {
        let mut locked = self.lock();
        let dirty = &mut *locked;
        let read = self.load_read(guard);

        if let Some(e) = read.map.get(&key) {
            // An expunged entry rejoins the overlay before it takes a value.
            if e.is_expunged(guard) {
                let overlay = self.dirty_locked(dirty, read, guard);
                if e.unexpunge_locked(guard) {
                    overlay.insert(key, Arc::clone(e));
                }
            }
            return e.swap_locked(Some(value), guard).cloned();
        }
        if let Some(e) = dirty.map.as_ref().and_then(|m| m.get(&key)) {
            return e.swap_locked(Some(value), guard).cloned();
        }
        self.dirty_locked(dirty, read, guard)
            .insert(key, Arc::new(Entry::new(value)));
        None
    }

    /// Update the value for `key` only if it is present. Returns the previous
    /// value; an absent key is left absent.
    pub fn replace<Q>(&self, key: &Q, value: V) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let guard = &epoch::pin();
        let read = self.load_read(guard);
        if let Some(e) = read.map.get(key) {
            return e.try_replace(value, guard).ok().cloned();
        }
        if !read.amended {
            return None;
        }

        let locked = self.lock();
        let read = self.load_read(guard);
        let e = match read.map.get(key) {
            Some(e) => e,
            None => locked.map.as_ref()?.get(key)?,
        };
        e.try_replace(value, guard).ok().cloned()
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let guard = &epoch::pin();
        let entry = self.locate(key, true, guard)?;
        entry.delete(guard).cloned()
    }

    pub fn clear(&self) {
        let guard = &epoch::pin();
        let mut locked = self.lock();
        debug!(amended = locked.map.is_some(), "clearing map");
        locked.map = None;
        locked.misses = 0;
        self.publish(Arc::new(self.new_table(0)), false, guard);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let table = self.present();
        let guard = &epoch::pin();
        table.values().filter(|e| e.load(guard).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        let table = self.present();
        let guard = &epoch::pin();
        !table.values().any(|e| e.load(guard).is_some())
    }

    pub fn keys(&self) -> Vec<K> {
        let table = self.present();
        let guard = &epoch::pin();
        table
            .iter()
            .filter(|(_, e)| e.load(guard).is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn values(&self) -> Vec<V> {
        let table = self.present();
        let guard = &epoch::pin();
        table
            .values()
            .filter_map(|e| e.load(guard).cloned())
            .collect()
    }

    /// Call `f` for every live pair until it returns an error, which is
    /// returned unchanged. `f` may call back into the map.
    pub fn for_each<F, E>(&self, mut f: F) -> core::result::Result<(), E>
    where
        F: FnMut(&K, &V) -> core::result::Result<(), E>,
    {
        let table = self.present();
        let guard = &epoch::pin();
        for (k, e) in table.iter() {
            if let Some(v) = e.load(guard) {
                f(k, v)?;
            }
        }
        Ok(())
    }

    /// Remove every live pair for which `f` returns false. Returns whether
    /// anything was removed.
    ///
    /// This is a best-effort scan: keys inserted by other threads while it
    /// runs may or may not be visited.
    pub fn retain<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&K, &V) -> bool,
    {
        let table = self.present();
        let guard = &epoch::pin();
        let mut removed = false;
        for (k, e) in table.iter() {
            if let Some(v) = e.load(guard) {
                if !f(k, v) && e.delete(guard).is_some() {
                    removed = true;
                }
            }
        }
        removed
    }

    /// Iterate over live `(key, value)` pairs.
    ///
    /// The key set is fixed when the iterator is created; each value is read
    /// when it is reached, so concurrent writes may or may not be observed.
    pub fn iter(&self) -> Iter<K, V> {
        let table = self.present();
        let entries: Vec<_> = table
            .iter()
            .map(|(k, e)| (k.clone(), Arc::clone(e)))
            .collect();
        Iter {
            inner: entries.into_iter(),
        }
    }

    pub fn to_json(&self) -> Result<String>
    where
        K: Serialize,
        V: Serialize,
    {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json<'de>(input: &'de str) -> Result<Self>
    where
        K: Deserialize<'de>,
        V: Deserialize<'de>,
        S: Default,
    {
        Ok(serde_json::from_str(input)?)
    }

    /// Replace the content with the JSON object in `input`. The payload is
    /// parsed in full first; on error the map is left untouched.
    pub fn load_json<'de>(&self, input: &'de str) -> Result<()>
    where
        K: Deserialize<'de>,
        V: Deserialize<'de>,
        S: Default,
    {
        let parsed: HashMap<K, V, S> = serde_json::from_str(input)?;
        self.install(parsed);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn debug_state(&self) -> (bool, Option<usize>, usize) {
        let guard = &epoch::pin();
        let locked = self.lock();
        let read = self.load_read(guard);
        (read.amended, locked.map.as_ref().map(|m| m.len()), locked.misses)
    }
}

impl<K, V, S> Drop for SyncHashMap<K, V, S> {
    fn drop(&mut self) {
        // SAFETY: `&mut self`, so nobody can still be reading this snapshot
        // through the map; earlier snapshots were retired via the epoch.
        unsafe {
            let guard = epoch::unprotected();
            let read = self.read.load(Ordering::Relaxed, guard);
            drop(read.into_owned());
        }
    }
}

/// Lazy iterator over a map's live pairs; see [`SyncHashMap::iter`].
pub struct Iter<K, V> {
    inner: std::vec::IntoIter<(K, Arc<Entry<V>>)>,
}

impl<K, V: Clone> Iterator for Iter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let guard = &epoch::pin();
        for (k, e) in self.inner.by_ref() {
            if let Some(v) = e.load(guard) {
                return Some((k, v.clone()));
            }
        }
        None
    }
}

impl<K, V, S> Clone for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Deep copy of the live pairs into fresh entries.
    fn clone(&self) -> Self {
        let table = self.present();
        let guard = &epoch::pin();
        let mut fresh = self.new_table(table.len());
        for (k, e) in table.iter() {
            if let Some(v) = e.load(guard) {
                fresh.insert(k.clone(), Arc::new(Entry::new(v.clone())));
            }
        }
        Self::from_table(fresh, self.hasher.clone())
    }
}

impl<K, V, S> PartialEq for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        let ours = self.present();
        let theirs = other.present();
        let guard = &epoch::pin();

        let mut live = 0usize;
        for (k, e) in ours.iter() {
            let Some(v) = e.load(guard) else { continue };
            live += 1;
            match theirs.get(k).and_then(|o| o.load(guard)) {
                Some(ov) if ov == v => {}
                _ => return false,
            }
        }

        let mut other_live = 0usize;
        for e in theirs.values() {
            if e.load(guard).is_some() {
                other_live += 1;
                if other_live > live {
                    return false;
                }
            }
        }
        live == other_live
    }
}

impl<K, V, S> Eq for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Eq + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
}

impl<K, V, S> fmt::Debug for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
    V: Clone + Send + Sync + fmt::Debug + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.present();
        let guard = &epoch::pin();
        f.debug_map()
            .entries(
                table
                    .iter()
                    .filter_map(|(k, e)| e.load(guard).map(|v| (k, v))),
            )
            .finish()
    }
}

impl<K, V, S> FromIterator<(K, V)> for SyncHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone + Default,
{
    /// Builds the initial snapshot directly; later duplicates win.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let hasher = S::default();
        let mut table: Table<K, V, S> = HashMap::with_hasher(hasher.clone());
        for (k, v) in iter {
            table.insert(k, Arc::new(Entry::new(v)));
        }
        Self::from_table(table, hasher)
    }
}

impl<K, V, S> Extend<(K, V)> for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> Serialize for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + Serialize + 'static,
    V: Clone + Send + Sync + Serialize + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> core::result::Result<Ser::Ok, Ser::Error> {
        let table = self.present();
        let guard = &epoch::pin();
        let mut out = serializer.serialize_map(None)?;
        for (k, e) in table.iter() {
            if let Some(v) = e.load(guard) {
                out.serialize_entry(k, v)?;
            }
        }
        out.end()
    }
}

impl<'de, K, V, S> Deserialize<'de> for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Deserialize<'de>,
    V: Deserialize<'de>,
    S: BuildHasher + Clone + Default,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let pairs: HashMap<K, V, S> = HashMap::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
