//! Entry: a single atomically swappable value slot.
//!
//! An entry is shared (via `Arc`) between the read snapshot and the dirty
//! overlay of one map. Its slot moves through three states:
//!
//! - `Valid(v)`: live value.
//! - `Deleted`: removed; the overlay, if any, still references the entry.
//! - `Expunged`: removed and left out of the overlay; only a stale snapshot
//!   references the entry. A key in this state must be re-registered in the
//!   overlay (under the map lock) before it can hold a value again.
//!
//! Transitions: `Valid -> Valid` and `Valid -> Deleted` happen lock-free via
//! CAS. `Deleted -> Expunged` and `Expunged -> Deleted` happen only with the
//! map lock held. `Expunged` never moves directly to `Valid`.
//!
//! Every transition installs a freshly allocated slot; the replaced slot is
//! retired through the epoch so readers pinned before the swap may keep
//! using it.

use core::sync::atomic::Ordering;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

#[derive(Debug)]
pub(crate) enum Slot<V> {
    Valid(V),
    Deleted,
    Expunged,
}

impl<V> Slot<V> {
    #[inline]
    fn value(&self) -> Option<&V> {
        match self {
            Slot::Valid(v) => Some(v),
            Slot::Deleted | Slot::Expunged => None,
        }
    }
}

pub(crate) struct Entry<V> {
    slot: Atomic<Slot<V>>,
}

fn into_value<V>(owned: Owned<Slot<V>>) -> V {
    match *owned.into_box() {
        Slot::Valid(v) => v,
        Slot::Deleted | Slot::Expunged => unreachable!("fresh slot always holds a value"),
    }
}

impl<V> Entry<V> {
    pub(crate) fn new(value: V) -> Self {
        Self {
            slot: Atomic::new(Slot::Valid(value)),
        }
    }

    #[inline]
    fn current<'a>(&'a self, guard: &'a Guard) -> (Shared<'a, Slot<V>>, &'a Slot<V>) {
        let p = self.slot.load(Ordering::Acquire, guard);
        // SAFETY: the slot is never null, and a replaced slot is only
        // reclaimed after every guard pinned before the replacement is gone.
        (p, unsafe { p.deref() })
    }

    #[inline]
    fn retire(&self, old: Shared<'_, Slot<V>>, guard: &Guard) {
        // SAFETY: `old` was just unlinked by a successful swap/CAS, so no
        // new reader can reach it.
        unsafe { guard.defer_destroy(old) };
    }

    /// Current value, or `None` if the entry is deleted or expunged.
    #[inline]
    pub(crate) fn load<'a>(&'a self, guard: &'a Guard) -> Option<&'a V> {
        self.current(guard).1.value()
    }

    pub(crate) fn is_expunged(&self, guard: &Guard) -> bool {
        matches!(self.current(guard).1, Slot::Expunged)
    }

    /// Store `value` unless the entry is expunged. Returns the previous
    /// value (if it was live) on success and hands `value` back on failure,
    /// in which case the caller must take the locked path.
    pub(crate) fn try_swap<'a>(&'a self, value: V, guard: &'a Guard) -> Result<Option<&'a V>, V> {
        let mut new = Owned::new(Slot::Valid(value));
        loop {
            let (cur, slot) = self.current(guard);
            if let Slot::Expunged = slot {
                return Err(into_value(new));
            }
            match self
                .slot
                .compare_exchange(cur, new, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => {
                    self.retire(cur, guard);
                    return Ok(slot.value());
                }
                Err(e) => new = e.new,
            }
        }
    }

    /// Store `value` only if the entry currently holds a live value.
    pub(crate) fn try_replace<'a>(&'a self, value: V, guard: &'a Guard) -> Result<&'a V, V> {
        let mut new = Owned::new(Slot::Valid(value));
        loop {
            let (cur, slot) = self.current(guard);
            let Some(old) = slot.value() else {
                return Err(into_value(new));
            };
            match self
                .slot
                .compare_exchange(cur, new, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => {
                    self.retire(cur, guard);
                    return Ok(old);
                }
                Err(e) => new = e.new,
            }
        }
    }

    /// `Valid -> Deleted`. Returns the removed value, or `None` if the entry
    /// was already deleted or expunged.
    pub(crate) fn delete<'a>(&'a self, guard: &'a Guard) -> Option<&'a V> {
        let mut new = Owned::new(Slot::Deleted);
        loop {
            let (cur, slot) = self.current(guard);
            let old = slot.value()?;
            match self
                .slot
                .compare_exchange(cur, new, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => {
                    self.retire(cur, guard);
                    return Some(old);
                }
                Err(e) => new = e.new,
            }
        }
    }

    /// Unconditionally store `value` (`None` stores `Deleted`) and return the
    /// previous live value. The map lock must be held and the entry must not
    /// be expunged.
    pub(crate) fn swap_locked<'a>(&'a self, value: Option<V>, guard: &'a Guard) -> Option<&'a V> {
        let new = match value {
            Some(v) => Slot::Valid(v),
            None => Slot::Deleted,
        };
        let old = self.slot.swap(Owned::new(new), Ordering::AcqRel, guard);
        // SAFETY: `old` stays valid while `guard` is pinned.
        debug_assert!(!matches!(unsafe { old.deref() }, Slot::Expunged));
        self.retire(old, guard);
        // SAFETY: retired, but not reclaimed while `guard` is pinned.
        unsafe { old.deref() }.value()
    }

    /// `Expunged -> Deleted`. Returns true if the entry was expunged. The map
    /// lock must be held.
    pub(crate) fn unexpunge_locked(&self, guard: &Guard) -> bool {
        let (cur, slot) = self.current(guard);
        if !matches!(slot, Slot::Expunged) {
            return false;
        }
        // Only lock holders move an entry out of `Expunged`, so this cannot race.
        match self.slot.compare_exchange(
            cur,
            Owned::new(Slot::Deleted),
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(_) => {
                self.retire(cur, guard);
                true
            }
            Err(_) => false,
        }
    }

    /// `Deleted -> Expunged`. Returns true iff the entry ends up expunged.
    /// The map lock must be held.
    pub(crate) fn try_expunge_locked(&self, guard: &Guard) -> bool {
        let mut new = Owned::new(Slot::Expunged);
        loop {
            let (cur, slot) = self.current(guard);
            match slot {
                Slot::Valid(_) => return false,
                Slot::Expunged => return true,
                Slot::Deleted => {}
            }
            match self
                .slot
                .compare_exchange(cur, new, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => {
                    self.retire(cur, guard);
                    return true;
                }
                Err(e) => new = e.new,
            }
        }
    }
}

impl<V> Drop for Entry<V> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader holds a reference into the
        // current slot; slots replaced earlier were already retired.
        unsafe {
            let guard = epoch::unprotected();
            let cur = self.slot.load(Ordering::Relaxed, guard);
            drop(cur.into_owned());
        }
    }
}
