//! Table: a [`LocalTable`] behind a `parking_lot` mutex.
//!
//! Each call locks for its own duration. The callback traversals
//! (`foreach`, `foreach_remove`) hold the lock for the whole walk, which is
//! what makes removal during the walk safe. Inserts and deletes check the
//! load factor in a second, separate critical section, so a resize never
//! extends the insert or delete itself.
//!
//! Lookups hand out clones (or run a closure under the lock) because a
//! reference into the table cannot outlive the lock. For a longer critical
//! section, [`Table::lock`] exposes the whole `LocalTable` API.

use crate::config::{ResizePolicy, TableBuilder, Thresholds};
use crate::cursor::Cursor;
use crate::error::Result;
use crate::key::{Key, KeyRef, OwnedKey};
use crate::local_table::{LocalTable, Put};
use crate::reentrancy::{DebugReentrancy, ReentrancyGuard};
use allocator_api2::alloc::{Allocator, Global};
use allocator_api2::vec::Vec as AllocVec;
use core::fmt;
use core::ops::{ControlFlow, Deref, DerefMut};
use parking_lot::{Mutex, MutexGuard};

/// Thread-safe chained hash table.
pub struct Table<'k, V, T = (), A: Allocator + Clone = Global> {
    reentrancy: DebugReentrancy,
    inner: Mutex<LocalTable<'k, V, T, A>>,
}

/// Exclusive access to a locked table; unlocks on drop.
pub struct TableGuard<'a, 'k, V, T, A: Allocator + Clone> {
    // Declared first: the holder record is cleared before the mutex unlocks.
    _entered: ReentrancyGuard<'a>,
    inner: MutexGuard<'a, LocalTable<'k, V, T, A>>,
}

impl<'a, 'k, V, T, A: Allocator + Clone> Deref for TableGuard<'a, 'k, V, T, A> {
    type Target = LocalTable<'k, V, T, A>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, 'k, V, T, A: Allocator + Clone> DerefMut for TableGuard<'a, 'k, V, T, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<'k, V, T> Table<'k, V, T, Global> {
    pub fn new() -> Self {
        Self::from_local(LocalTable::new())
    }

    pub fn builder() -> TableBuilder<V, T, Global> {
        TableBuilder::new()
    }
}

impl<'k, V, T> Default for Table<'k, V, T, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'k, V, T, A: Allocator + Clone> From<LocalTable<'k, V, T, A>> for Table<'k, V, T, A> {
    fn from(local: LocalTable<'k, V, T, A>) -> Self {
        Self::from_local(local)
    }
}

impl<'k, V, T, A: Allocator + Clone> Table<'k, V, T, A> {
    pub fn from_local(local: LocalTable<'k, V, T, A>) -> Self {
        Self {
            reentrancy: DebugReentrancy::new(),
            inner: Mutex::new(local),
        }
    }

    pub fn into_local(self) -> LocalTable<'k, V, T, A> {
        self.inner.into_inner()
    }

    /// Lock the table until the guard drops.
    ///
    /// Panics in debug builds if this thread already holds the lock.
    pub fn lock(&self) -> TableGuard<'_, 'k, V, T, A> {
        self.reentrancy.check();
        let inner = self.inner.lock();
        TableGuard {
            _entered: self.reentrancy.enter(),
            inner,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.lock().bucket_count()
    }

    pub fn buckets_used(&self) -> usize {
        self.lock().buckets_used()
    }

    pub fn resized_count(&self) -> usize {
        self.lock().resized_count()
    }

    pub fn set_resize_policy(&self, policy: ResizePolicy) {
        self.lock().set_resize_policy(policy);
    }

    pub fn thresholds(&self) -> Thresholds {
        self.lock().thresholds()
    }

    pub fn set_thresholds(&self, low: Option<f32>, high: Option<f32>) -> Result<()> {
        self.lock().set_thresholds(low, high)
    }

    /// Clone of the value for `key`.
    pub fn get<'q>(&self, key: impl Into<Key<'q, T>>) -> Option<V>
    where
        T: 'q,
        V: Clone,
    {
        self.get_with(key, V::clone)
    }

    /// Run `f` on the value for `key` while the lock is held.
    pub fn get_with<'q, R, F>(&self, key: impl Into<Key<'q, T>>, f: F) -> Option<R>
    where
        T: 'q,
        F: FnOnce(&V) -> R,
    {
        self.lock().get(key).map(f)
    }

    pub fn exists<'q>(&self, key: impl Into<Key<'q, T>>) -> bool
    where
        T: 'q,
    {
        self.lock().exists(key)
    }

    /// See [`LocalTable::put`].
    pub fn put<'q>(&self, key: impl Into<Key<'q, T>>, value: V) -> Result<Put<V>>
    where
        T: Clone + 'q,
    {
        let put = self.lock().put_copied(key.into().normalize(), value)?;
        if put.is_inserted() {
            self.lock().grow_if_needed();
        }
        Ok(put)
    }

    /// See [`LocalTable::put_borrowed`].
    pub fn put_borrowed(&self, key: impl Into<Key<'k, T>>, value: V) -> Result<Put<V>> {
        let put = self.lock().put_uncopied(key.into().normalize(), value)?;
        if put.is_inserted() {
            self.lock().grow_if_needed();
        }
        Ok(put)
    }

    /// See [`LocalTable::delete`].
    pub fn delete<'q>(&self, key: impl Into<Key<'q, T>>) -> Option<V>
    where
        T: 'q,
    {
        let released = {
            let mut table = self.lock();
            let value = table.take(key.into().normalize())?;
            table.release(value)
        };
        self.lock().shrink_if_needed();
        released
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn rehash(&self) -> bool {
        self.lock().rehash()
    }

    /// See [`LocalTable::keys`].
    pub fn keys(&self) -> Result<AllocVec<OwnedKey<T, A>, A>>
    where
        T: Clone,
    {
        self.lock().keys()
    }

    pub fn each(&self) -> Cursor {
        Cursor::new()
    }

    /// Copies of the entry under `cursor`, advancing it. Each step locks
    /// separately; see [`Cursor`] for what concurrent mutation means. The
    /// key copy comes from the table allocator; if it cannot be made the
    /// cursor stays put.
    pub fn next(&self, cursor: &mut Cursor) -> Result<Option<(OwnedKey<T, A>, V)>>
    where
        T: Clone,
        V: Clone,
    {
        let table = self.lock();
        let mut ahead = cursor.clone();
        let Some((k, v)) = table.next(&mut ahead) else {
            *cursor = ahead;
            return Ok(None);
        };
        let key = k.to_owned_key_in(table.allocator().clone())?;
        let value = v.clone();
        *cursor = ahead;
        Ok(Some((key, value)))
    }

    /// See [`LocalTable::foreach`]. Holds the lock for the whole walk.
    pub fn foreach<B, F>(&self, f: F) -> ControlFlow<B, usize>
    where
        F: FnMut(KeyRef<'_, T>, &V) -> ControlFlow<B>,
    {
        self.lock().foreach(f)
    }

    /// See [`LocalTable::foreach_remove`]. Holds the lock for the whole walk.
    pub fn foreach_remove<F>(&self, remove: F) -> usize
    where
        F: FnMut(KeyRef<'_, T>, &V) -> bool,
    {
        self.lock().foreach_remove(remove)
    }

    pub fn foreach_remove_with<F, D>(&self, remove: F, dispose: D) -> usize
    where
        F: FnMut(KeyRef<'_, T>, &V) -> bool,
        D: FnMut(V),
    {
        self.lock().foreach_remove_with(remove, dispose)
    }

    /// Snapshot this table, then insert the copies into `dst`. The two
    /// tables are never locked at the same time.
    pub fn copy_into<'d, B>(&self, dst: &Table<'d, V, T, B>) -> Result<()>
    where
        B: Allocator + Clone,
        T: Clone,
        V: Clone,
    {
        let items = self.lock().snapshot()?;
        let mut out = dst.lock();
        for (k, v) in items {
            out.put(k.as_key(), v)?;
        }
        Ok(())
    }

    /// See [`LocalTable::merge`]. Each input is locked only while it is
    /// being copied.
    pub fn merge<'n>(a: &Self, b: &Self, policy: ResizePolicy) -> Result<Table<'n, V, T, A>>
    where
        T: Clone,
        V: Clone,
    {
        let hint = a.len() + b.len();
        let (mut out, first) = {
            let table = a.lock();
            (table.sized_like(hint, policy)?, table.snapshot()?)
        };
        let second = b.lock().snapshot()?;
        for (k, v) in first.into_iter().chain(second) {
            out.put(k.as_key(), v)?;
        }
        Ok(Table::from_local(out))
    }

    /// See [`LocalTable::dispose_with`].
    pub fn dispose_with<D: FnMut(V)>(self, dispose: D) {
        self.into_local().dispose_with(dispose);
    }
}

impl<'k, V: fmt::Debug, T: fmt::Debug, A: Allocator + Clone> fmt::Debug for Table<'k, V, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.lock(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_send_sync<X: Send + Sync>() {}

    /// Invariant: Tables can be shared across threads.
    #[test]
    fn table_is_send_sync() {
        assert_send_sync::<Table<'static, String>>();
        assert_send_sync::<Table<'static, Vec<u8>, (u32, u32)>>();
    }

    /// Invariant: Calls through the shared handle behave like the local table.
    #[test]
    fn shared_operations() {
        let t: Table<'static, String> = Table::new();
        assert!(t.put(c"one", "1".to_string()).unwrap().is_inserted());
        assert_eq!(t.get(c"one").as_deref(), Some("1"));
        assert_eq!(t.get_with(c"one", |v| v.len()), Some(1));
        assert!(t.exists(c"one"));
        assert_eq!(t.delete(c"one").as_deref(), Some("1"));
        assert!(t.is_empty());
    }

    /// Invariant: The guard exposes the whole local API for a longer critical section.
    #[test]
    fn guard_gives_local_api() {
        let t: Table<'static, u32> = Table::new();
        {
            let mut g = t.lock();
            g.put(b"a", 1).unwrap();
            *g.get_mut(b"a").unwrap() += 1;
        }
        assert_eq!(t.get(b"a"), Some(2));
    }

    /// Invariant: Calling back into a table from inside its own traversal
    /// panics in debug builds instead of deadlocking, and leaves the table usable.
    #[cfg(debug_assertions)]
    #[test]
    fn nested_entry_panics() {
        let t: Table<'static, u32> = Table::new();
        t.put(b"a", 1).unwrap();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            t.foreach(|_, _| {
                let _ = t.get(b"a");
                ControlFlow::<()>::Continue(())
            })
        }));
        assert!(res.is_err());
        assert_eq!(t.get(b"a"), Some(1));
    }

    /// Invariant: Cursor steps over a shared table yield owned copies.
    #[test]
    fn cursor_over_shared_table() {
        let t: Table<'static, u32> = Table::new();
        for i in 0u32..5 {
            t.put(&i.to_le_bytes(), i).unwrap();
        }
        let mut c = t.each();
        let mut seen = Vec::new();
        while let Some((k, v)) = t.next(&mut c).unwrap() {
            assert_eq!(k.as_bytes(), Some(&v.to_le_bytes()[..]));
            seen.push(v);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    /// Invariant: Copying a table into itself and merging it with itself
    /// does not deadlock.
    #[test]
    fn self_copy_and_merge() {
        let t: Table<'static, u32> = Table::new();
        t.put(b"x", 1).unwrap();
        t.copy_into(&t).unwrap();
        assert_eq!(t.len(), 1);
        let m: Table<'static, u32> = Table::merge(&t, &t, ResizePolicy::Auto).unwrap();
        assert_eq!(m.get(b"x"), Some(1));
    }

    /// Invariant: A shared table grows from concurrent writers.
    #[test]
    fn concurrent_puts_grow() {
        let t: Arc<Table<'static, u64>> = Arc::new(Table::new());
        std::thread::scope(|s| {
            for w in 0u64..4 {
                let t = &t;
                s.spawn(move || {
                    for i in 0..250 {
                        let k = w * 1000 + i;
                        t.put(&k.to_le_bytes(), k).unwrap();
                    }
                });
            }
        });
        assert_eq!(t.len(), 1000);
        assert!(t.len() as f32 / t.bucket_count() as f32 <= 0.75);
    }
}
