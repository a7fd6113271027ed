//! sync-hashmap: a concurrent, read-optimized HashMap (and a HashSet on
//! top of it) where read hits never block and writers share one mutex.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: amortize write cost across a read-mostly workload. Lookups of
//!   keys that have settled into the read snapshot are lock-free; only new
//!   keys and lookups that fall back to the overlay take the lock.
//! - Layers:
//!   - Entry<V>: one atomic value slot with three states (Valid, Deleted,
//!     Expunged). The unit of lock-free mutation.
//!   - SyncHashMap<K, V, S>: an epoch-published read snapshot
//!     `{map, amended}` plus a mutex-guarded dirty overlay and a miss
//!     counter. Implements the read/write/promote protocol.
//!   - SyncHashSet<T, S>: a SyncHashMap keyed by element with a unit value.
//!
//! Entry lifecycle
//! - Valid(v) -> Valid(v') and Valid(v) -> Deleted by CAS, without the lock.
//! - Deleted -> Expunged only with the lock held, while copying the snapshot
//!   into a fresh overlay. Expunged entries are left out of that overlay.
//! - Expunged -> Deleted only with the lock held, when a write resurrects
//!   the key through the overlay. Expunged never becomes Valid directly.
//!
//! Promotion
//! - Every lookup that has to consult the overlay counts a miss. Once
//!   misses reach the overlay size, the overlay becomes the new snapshot
//!   and the map is unamended again.
//! - Aggregate operations (`len`, `keys`, `values`, `for_each`, equality,
//!   serialization) force a pending promotion first, so they see one key
//!   set with no double counting.
//!
//! Memory reclamation
//! - Value slots and snapshots live behind `crossbeam_epoch::Atomic`.
//!   Replaced objects are retired with `defer_destroy` and freed once no
//!   pinned reader can observe them. Entries are shared between snapshot
//!   and overlay through `Arc`.
//! - Values are handed out by clone, so no borrow outlives an epoch pin.
//!
//! Consistency
//! - Per-key linearizability only; there is no cross-key atomicity.
//! - Iteration fixes the key set when it starts; each value is read when
//!   reached, so concurrent writes may or may not be observed per key.
//!
//! Reentrancy policy
//! - `K: Hash`/`K: Eq` run while the overlay mutex is held. Calling back
//!   into the same map from there would deadlock; a debug-only guard turns
//!   that into a panic with a clear message. Closures passed to `for_each`
//!   and `retain` run without the lock and may use the map freely.
//!
//! Notes and non-goals
//! - No ordered iteration, persistence or cross-key transactions.
//! - One mutex per map; no sharding.

mod entry;
pub mod error;
mod reentrancy;
mod sync_hash_map;
mod sync_hash_map_proptest;
mod sync_hash_set;

// Public surface
pub use error::{Error, Result};
pub use sync_hash_map::{Iter, SyncHashMap};
pub use sync_hash_set::{SetIter, SyncHashSet};
