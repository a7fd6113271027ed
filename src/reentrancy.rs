//! Debug-only reentrancy guard.
//!
//! `K: Hash` and `K: Eq` run while a map holds its overlay mutex. Calling
//! back into the same map from there would block forever on the
//! non-reentrant mutex. In debug builds the guard records which thread owns
//! the critical section and panics on nested entry from that thread. In
//! release builds this compiles to a zero-cost no-op.

#[cfg(not(debug_assertions))]
use core::marker::PhantomData;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-instance owner tracker. Call `check` before taking the lock and keep
/// the guard from `enter` alive for as long as the lock is held.
#[derive(Debug)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    owner: AtomicUsize,
}

// Address of a thread-local byte; unique among live threads and never zero.
#[cfg(debug_assertions)]
fn current_thread() -> usize {
    thread_local!(static MARKER: u8 = 0);
    MARKER.with(|m| m as *const u8 as usize)
}

impl DebugReentrancy {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            owner: AtomicUsize::new(0),
        }
    }

    /// Panics (debug builds) if the calling thread already owns the section.
    #[inline]
    pub(crate) fn check(&self) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.owner.load(Ordering::Relaxed) != current_thread(),
                "reentrancy detected: nested entry into a locked map section"
            );
        }
    }

    /// Mark the calling thread as owner. Only call with the lock held.
    #[inline]
    pub(crate) fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let prev = self.owner.swap(current_thread(), Ordering::Relaxed);
            debug_assert_eq!(prev, 0);
            ReentrancyGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard { _z: PhantomData }
        }
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub(crate) struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.owner.owner.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::DebugReentrancy;

    #[test]
    fn enter_and_exit_is_ok() {
        let r = DebugReentrancy::new();
        r.check();
        {
            let _g = r.enter();
        }
        r.check();
    }

    #[test]
    fn other_threads_are_not_reentrant() {
        let r = DebugReentrancy::new();
        let _g = r.enter();
        std::thread::scope(|s| {
            s.spawn(|| r.check()).join().unwrap();
        });
    }

    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_in_debug() {
        let r = DebugReentrancy::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g = r.enter();
            r.check();
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
        // The guard was released during unwinding.
        r.check();
    }
}
