//! Debug-only reentrancy guard for locked tables.
//!
//! A thread that calls back into a table it has already locked (say, from a
//! `foreach` callback or a value destructor) would deadlock on the table
//! mutex. In debug builds the guard remembers which thread holds the lock
//! and panics on such a nested entry instead. In release builds this
//! compiles to a zero-cost no-op.

#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicUsize, Ordering};
#[cfg(not(debug_assertions))]
use core::marker::PhantomData;

/// Identity of the calling thread: the address of a thread-local byte.
/// Never zero, and unique among live threads.
#[cfg(debug_assertions)]
fn thread_token() -> usize {
    thread_local! {
        static TOKEN: u8 = const { 0 };
    }
    TOKEN.with(|t| t as *const u8 as usize)
}

/// Per-table record of the thread inside the critical section.
#[derive(Debug)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    holder: AtomicUsize,
}

impl DebugReentrancy {
    /// Const so it can be a field default.
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            holder: AtomicUsize::new(0),
        }
    }

    /// Call before blocking on the lock. In debug builds, panics if the
    /// calling thread already holds it.
    #[inline]
    pub fn check(&self) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.holder.load(Ordering::Relaxed) != thread_token(),
                "reentrancy detected: thread re-entered a table it has locked"
            );
        }
    }

    /// Call once the lock is held; the returned guard clears the record and
    /// must be dropped before the lock is released.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            self.holder.store(thread_token(), Ordering::Relaxed);
            ReentrancyGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard { _z: PhantomData }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl<'a> Drop for ReentrancyGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.owner.holder.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::DebugReentrancy;

    /// Invariant: Sequential critical sections on one thread are fine.
    #[test]
    fn enter_and_exit_is_ok() {
        let r = DebugReentrancy::new();
        for _ in 0..3 {
            r.check();
            let _g = r.enter();
        }
    }

    /// Invariant: Checking while the same thread is inside panics in debug.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_in_debug() {
        let r = DebugReentrancy::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g1 = r.enter();
            // Re-entering should panic in debug builds
            r.check();
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }

    /// Invariant: Another thread's critical section does not trip the check.
    #[test]
    fn other_threads_pass() {
        let r = DebugReentrancy::new();
        let _g = r.enter();
        std::thread::scope(|s| {
            s.spawn(|| r.check());
        });
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn reentrancy_noop_in_release() {
        let r = DebugReentrancy::new();
        let _g1 = r.enter();
        r.check();
        let _g2 = r.enter();
        let (_g1, _g2) = (_g1, _g2);
    }
}
