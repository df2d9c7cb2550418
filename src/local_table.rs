//! LocalTable: the table controller without a lock.
//!
//! Every operation of the crate lives here; [`crate::Table`] wraps a
//! `LocalTable` in a mutex. Use `LocalTable` directly when the table is
//! owned by one thread or already sits behind the caller's own lock: the
//! borrow checker then enforces what the lock would have.
//!
//! Keys are matched in this order: mismatched kinds never match; byte keys
//! of different length never match; identical references always match;
//! then the custom comparator if any, then case-insensitive or exact byte
//! comparison. Composite keys match by reference or by schema comparison.

use crate::config::{
    bucket_size, CmpFn, HashFn, ResizePolicy, Settings, TableBuilder, Thresholds, ValuePolicy,
    DEFAULT_SIZE,
};
use crate::cursor::{Cursor, Iter};
use crate::error::{Result, TableError};
use crate::hash;
use crate::key::{Key, KeyRef, OwnedKey, StoredKey};
use crate::schema::Schema;
use crate::store::{Entry, Store, MAX_BUCKETS};
use allocator_api2::alloc::{Allocator, Global};
use allocator_api2::vec::Vec as AllocVec;
use core::cmp::Ordering;
use core::fmt;
use core::ops::ControlFlow;
use std::sync::Arc;

/// Outcome of a `put`.
#[derive(Debug, PartialEq, Eq)]
pub enum Put<V> {
    /// The key was new; an entry was linked.
    Inserted,
    /// The key existed and its value was replaced. `previous` is `None`
    /// when the table's value policy consumed the old value.
    Replaced { previous: Option<V> },
}

impl<V> Put<V> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Put::Inserted)
    }

    pub fn into_previous(self) -> Option<V> {
        match self {
            Put::Inserted => None,
            Put::Replaced { previous } => previous,
        }
    }
}

/// Unsynchronized chained hash table.
///
/// `'k` bounds keys stored without copying (see [`LocalTable::put_borrowed`]);
/// tables that only copy keys may pick any lifetime.
pub struct LocalTable<'k, V, T = (), A: Allocator + Clone = Global> {
    store: Store<'k, V, T, A>,
    settings: Settings<V, T>,
    resized: usize,
}

impl<'k, V, T> LocalTable<'k, V, T, Global> {
    /// Default table: 8 buckets, shrinking only after the first growth.
    pub fn new() -> Self {
        Self {
            store: Store::new_in(DEFAULT_SIZE, Global),
            settings: Settings::default(),
            resized: 0,
        }
    }

    pub fn builder() -> TableBuilder<V, T, Global> {
        TableBuilder::new()
    }
}

impl<'k, V, T> Default for LocalTable<'k, V, T, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'k, V, T, A: Allocator + Clone> LocalTable<'k, V, T, A> {
    pub(crate) fn from_parts(buckets: usize, settings: Settings<V, T>, alloc: A) -> Result<Self> {
        Ok(Self {
            store: Store::with_buckets_in(buckets, alloc)?,
            settings,
            resized: 0,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.store.bucket_count()
    }

    /// Buckets holding at least one entry.
    pub fn buckets_used(&self) -> usize {
        self.store.buckets_used()
    }

    /// Completed rehashes over the table's lifetime.
    pub fn resized_count(&self) -> usize {
        self.resized
    }

    pub fn allocator(&self) -> &A {
        self.store.allocator()
    }

    // ----- configuration -----

    pub fn resize_policy(&self) -> ResizePolicy {
        self.settings.resize
    }

    pub fn set_resize_policy(&mut self, policy: ResizePolicy) {
        self.settings.resize = policy;
    }

    pub fn thresholds(&self) -> Thresholds {
        self.settings.thresholds
    }

    /// `None` or a negative value keeps that side; `high < low` is rejected.
    pub fn set_thresholds(&mut self, low: Option<f32>, high: Option<f32>) -> Result<()> {
        self.settings.thresholds = self.settings.thresholds.update(low, high)?;
        Ok(())
    }

    pub fn ignore_case(&self) -> bool {
        self.settings.ignore_case
    }

    pub fn schema(&self) -> Option<&Schema<T>> {
        self.settings.schema.as_deref()
    }

    pub fn value_policy(&self) -> &ValuePolicy<V> {
        &self.settings.values
    }

    /// Like the hooks, the value policy is fixed once the table holds
    /// entries, so every stored value is consumed under the policy it was
    /// inserted with.
    pub fn set_value_policy(&mut self, policy: ValuePolicy<V>) -> Result<()> {
        self.ensure_empty()?;
        self.settings.values = policy;
        Ok(())
    }

    fn ensure_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        tracing::warn!(
            entries = self.len(),
            "refusing to reconfigure a non-empty table"
        );
        Err(TableError::NotEmpty {
            entries: self.len(),
        })
    }

    pub fn set_hash_fn<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&[u8]) -> u32 + Send + Sync + 'static,
    {
        self.ensure_empty()?;
        self.settings.hash_fn = Some(Arc::new(f) as HashFn);
        Ok(())
    }

    pub fn set_cmp_fn<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    {
        self.ensure_empty()?;
        self.settings.cmp_fn = Some(Arc::new(f) as CmpFn);
        Ok(())
    }

    pub fn set_schema(&mut self, schema: Schema<T>) -> Result<()> {
        self.ensure_empty()?;
        self.settings.schema = Some(Arc::new(schema));
        Ok(())
    }

    pub fn set_ignore_case(&mut self, on: bool) -> Result<()> {
        self.ensure_empty()?;
        self.settings.ignore_case = on;
        Ok(())
    }

    // ----- hashing and matching -----

    fn hash_of(&self, key: KeyRef<'_, T>) -> Result<usize> {
        match key {
            KeyRef::Opaque(id) => Ok(id.id()),
            KeyRef::Composite(c) => match &self.settings.schema {
                Some(schema) => Ok(schema.hash(c) as usize),
                None => Err(TableError::MissingSchema),
            },
            KeyRef::Bytes(b) => self.hash_bytes(b).map(|h| h as usize),
        }
    }

    fn hash_bytes(&self, bytes: &[u8]) -> Result<u32> {
        match (&self.settings.hash_fn, self.settings.ignore_case) {
            (None, false) => Ok(hash::hash_bytes(bytes)),
            (None, true) => Ok(hash::hash_bytes_ignore_case(bytes)),
            (Some(f), false) => Ok(f(bytes)),
            (Some(f), true) => {
                // The custom hash sees the lowercased key; the scratch copy
                // comes from the table allocator and is freed right after.
                let mut lowered = AllocVec::new_in(self.allocator().clone());
                if lowered.try_reserve_exact(bytes.len()).is_err() {
                    tracing::warn!(bytes = bytes.len(), "no memory to case-fold key");
                    return Err(TableError::AllocFailed { bytes: bytes.len() });
                }
                lowered.extend(bytes.iter().map(u8::to_ascii_lowercase));
                Ok(f(&lowered))
            }
        }
    }

    fn key_eq(&self, wanted: KeyRef<'_, T>, stored: KeyRef<'_, T>) -> bool {
        match (wanted, stored) {
            (KeyRef::Bytes(a), KeyRef::Bytes(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                if a.as_ptr() == b.as_ptr() {
                    return true;
                }
                match &self.settings.cmp_fn {
                    Some(cmp) => cmp(a, b).is_eq(),
                    None if self.settings.ignore_case => eq_ignore_case(a, b),
                    None => a == b,
                }
            }
            (KeyRef::Opaque(a), KeyRef::Opaque(b)) => a == b,
            (KeyRef::Composite(a), KeyRef::Composite(b)) => {
                core::ptr::eq(a, b)
                    || self
                        .settings
                        .schema
                        .as_ref()
                        .is_some_and(|s| s.compare(a, b).is_eq())
            }
            _ => false,
        }
    }

    fn locate(&self, key: KeyRef<'_, T>) -> Option<(Option<usize>, usize)> {
        let hash = self.hash_of(key).ok()?;
        self.store
            .find(hash, |e| e.hash == hash && self.key_eq(key, e.key.view()))
    }

    // ----- lookups -----

    pub fn get<'q>(&self, key: impl Into<Key<'q, T>>) -> Option<&V>
    where
        T: 'q,
    {
        self.get_key_value(key).map(|(_, v)| v)
    }

    /// The stored key alongside the value; under case-insensitive matching
    /// the stored key keeps the spelling it was inserted with.
    pub fn get_key_value<'q>(&self, key: impl Into<Key<'q, T>>) -> Option<(KeyRef<'_, T>, &V)>
    where
        T: 'q,
    {
        let (_, idx) = self.locate(key.into().normalize())?;
        let e = self.store.entry(idx)?;
        Some((e.key.view(), &e.value))
    }

    pub fn get_mut<'q>(&mut self, key: impl Into<Key<'q, T>>) -> Option<&mut V>
    where
        T: 'q,
    {
        let (_, idx) = self.locate(key.into().normalize())?;
        self.store.entry_mut(idx).map(|e| &mut e.value)
    }

    pub fn exists<'q>(&self, key: impl Into<Key<'q, T>>) -> bool
    where
        T: 'q,
    {
        self.locate(key.into().normalize()).is_some()
    }

    // ----- insertion -----

    /// Insert or replace, storing a copy of the key.
    ///
    /// Byte keys are copied through the table allocator and composite keys
    /// are cloned. A replaced value is returned only under
    /// [`ValuePolicy::Return`]. May grow the table.
    pub fn put<'q>(&mut self, key: impl Into<Key<'q, T>>, value: V) -> Result<Put<V>>
    where
        T: Clone + 'q,
    {
        let put = self.put_copied(key.into().normalize(), value)?;
        if put.is_inserted() {
            self.grow_if_needed();
        }
        Ok(put)
    }

    /// Insert or replace without copying the key: the entry keeps the
    /// caller's reference, which must therefore outlive the table.
    pub fn put_borrowed(&mut self, key: impl Into<Key<'k, T>>, value: V) -> Result<Put<V>> {
        let put = self.put_uncopied(key.into().normalize(), value)?;
        if put.is_inserted() {
            self.grow_if_needed();
        }
        Ok(put)
    }

    pub(crate) fn put_copied(&mut self, key: KeyRef<'_, T>, value: V) -> Result<Put<V>>
    where
        T: Clone,
    {
        self.upsert(key, value, |alloc| match key {
            KeyRef::Bytes(b) => {
                let mut copy = AllocVec::new_in(alloc.clone());
                copy.try_reserve_exact(b.len())
                    .map_err(|_| TableError::AllocFailed { bytes: b.len() })?;
                copy.extend_from_slice(b);
                Ok(StoredKey::Bytes(copy))
            }
            KeyRef::Opaque(id) => Ok(StoredKey::Opaque(id)),
            KeyRef::Composite(c) => Ok(StoredKey::Composite(c.clone())),
        })
    }

    pub(crate) fn put_uncopied(&mut self, key: KeyRef<'k, T>, value: V) -> Result<Put<V>> {
        self.upsert(key, value, |_| {
            Ok(match key {
                KeyRef::Bytes(b) => StoredKey::BorrowedBytes(b),
                KeyRef::Opaque(id) => StoredKey::Opaque(id),
                KeyRef::Composite(c) => StoredKey::BorrowedComposite(c),
            })
        })
    }

    fn upsert<F>(&mut self, key: KeyRef<'_, T>, value: V, store_key: F) -> Result<Put<V>>
    where
        F: FnOnce(&A) -> Result<StoredKey<'k, T, A>>,
    {
        let hash = self.hash_of(key)?;
        let found = self
            .store
            .find(hash, |e| e.hash == hash && self.key_eq(key, e.key.view()));
        if let Some((_, idx)) = found {
            if let Some(e) = self.store.entry_mut(idx) {
                let old = core::mem::replace(&mut e.value, value);
                return Ok(Put::Replaced {
                    previous: self.settings.values.release(old),
                });
            }
        }
        let stored = store_key(self.store.allocator())?;
        self.store.insert(Entry::new(stored, value, hash))?;
        Ok(Put::Inserted)
    }

    // ----- removal -----

    /// Remove `key`. The value comes back only under [`ValuePolicy::Return`].
    /// May shrink the table.
    pub fn delete<'q>(&mut self, key: impl Into<Key<'q, T>>) -> Option<V>
    where
        T: 'q,
    {
        let value = self.take(key.into().normalize())?;
        let released = self.settings.values.release(value);
        self.shrink_if_needed();
        released
    }

    /// Unlink the entry for `key` and return its value untouched by the policy.
    pub(crate) fn take(&mut self, key: KeyRef<'_, T>) -> Option<V> {
        let (prev, idx) = self.locate(key)?;
        self.store.remove(prev, idx).map(|e| e.value)
    }

    pub(crate) fn release(&self, value: V) -> Option<V> {
        self.settings.values.release(value)
    }

    /// Remove every entry, disposing values per the value policy. The bucket
    /// array only shrinks through the usual shrink check.
    pub fn clear(&mut self) {
        let values = &self.settings.values;
        self.store.drain_with(|e| values.dispose(e.value));
        self.shrink_if_needed();
    }

    // ----- resizing -----

    fn load(&self) -> f32 {
        self.len() as f32 / self.bucket_count() as f32
    }

    pub(crate) fn grow_if_needed(&mut self) {
        if self.settings.resize == ResizePolicy::Frozen {
            return;
        }
        if self.load() > self.settings.thresholds.high {
            tracing::trace!(
                entries = self.len(),
                buckets = self.bucket_count(),
                "load above high threshold"
            );
            self.rehash();
        }
    }

    pub(crate) fn shrink_if_needed(&mut self) {
        match self.settings.resize {
            ResizePolicy::Frozen => return,
            ResizePolicy::FrozenUntilGrows if self.resized == 0 => return,
            _ => {}
        }
        if self.load() < self.settings.thresholds.low {
            tracing::trace!(
                entries = self.len(),
                buckets = self.bucket_count(),
                "load below low threshold"
            );
            self.rehash();
        }
    }

    /// Resize to the smallest power of two not below
    /// `2 * entries / (low + high)`. Returns whether the bucket count changed.
    pub fn rehash(&mut self) -> bool {
        let t = self.settings.thresholds;
        let wanted = (self.len() * 2) as f32 / (t.high + t.low);
        // Extreme thresholds ask for absurd sizes; the allocator refuses
        // those like any other failed resize.
        let target = (wanted as usize).clamp(1, MAX_BUCKETS).next_power_of_two();
        let before = self.bucket_count();
        if target == before {
            return false;
        }
        if let Err(err) = self.store.resize(target) {
            tracing::warn!(%err, buckets = target, "rehash failed, keeping current buckets");
            return false;
        }
        self.resized += 1;
        tracing::debug!(
            from = before,
            to = target,
            entries = self.len(),
            resized = self.resized,
            "rehashed"
        );
        true
    }

    // ----- snapshots -----

    /// Independent copies of every key, allocated from the table allocator.
    pub fn keys(&self) -> Result<AllocVec<OwnedKey<T, A>, A>>
    where
        T: Clone,
    {
        let mut keys = self.snapshot_vec()?;
        for e in self.store.iter() {
            keys.push(e.key.view().to_owned_key_in(self.allocator().clone())?);
        }
        Ok(keys)
    }

    /// Every key, borrowed from the live entries.
    pub fn keys_fast(&self) -> Result<AllocVec<KeyRef<'_, T>, A>> {
        let mut keys = self.snapshot_vec()?;
        keys.extend(self.store.iter().map(|e| e.key.view()));
        Ok(keys)
    }

    /// Copies of every entry, for re-insertion into another table.
    pub(crate) fn snapshot(&self) -> Result<AllocVec<(OwnedKey<T, A>, V), A>>
    where
        T: Clone,
        V: Clone,
    {
        let mut items = self.snapshot_vec()?;
        for e in self.store.iter() {
            let key = e.key.view().to_owned_key_in(self.allocator().clone())?;
            items.push((key, e.value.clone()));
        }
        Ok(items)
    }

    // Room for one item per entry, so filling it never reallocates.
    fn snapshot_vec<X>(&self) -> Result<AllocVec<X, A>> {
        let mut out = AllocVec::new_in(self.allocator().clone());
        out.try_reserve_exact(self.len()).map_err(|_| {
            tracing::warn!(entries = self.len(), "no memory for key snapshot");
            TableError::AllocFailed {
                bytes: self.len().saturating_mul(core::mem::size_of::<X>()),
            }
        })?;
        Ok(out)
    }

    // ----- traversal -----

    /// Start a traversal at the first bucket.
    pub fn each(&self) -> Cursor {
        Cursor::new()
    }

    /// The entry under `cursor`, advancing it. `None` once past the last bucket.
    pub fn next(&self, cursor: &mut Cursor) -> Option<(KeyRef<'_, T>, &V)> {
        let idx = self.store.advance(cursor)?;
        let e = self.store.entry(idx)?;
        Some((e.key.view(), &e.value))
    }

    pub fn iter(&self) -> Iter<'_, 'k, V, T, A> {
        Iter {
            entries: self.store.iter(),
        }
    }

    /// Call `f` on every entry in bucket order. Stops at the first `Break`
    /// and returns it; otherwise returns how many entries were visited.
    pub fn foreach<B, F>(&self, mut f: F) -> ControlFlow<B, usize>
    where
        F: FnMut(KeyRef<'_, T>, &V) -> ControlFlow<B>,
    {
        let mut visited = 0;
        for e in self.store.iter() {
            visited += 1;
            if let ControlFlow::Break(b) = f(e.key.view(), &e.value) {
                return ControlFlow::Break(b);
            }
        }
        ControlFlow::Continue(visited)
    }

    /// Remove every entry `remove` accepts, disposing values per the value
    /// policy. Returns the number removed.
    pub fn foreach_remove<F>(&mut self, mut remove: F) -> usize
    where
        F: FnMut(KeyRef<'_, T>, &V) -> bool,
    {
        let values = &self.settings.values;
        self.store.remove_where(
            |e| remove(e.key.view(), &e.value),
            |e| values.dispose(e.value),
        )
    }

    /// Like [`LocalTable::foreach_remove`], handing removed values to `dispose`
    /// instead of the value policy.
    pub fn foreach_remove_with<F, D>(&mut self, mut remove: F, mut dispose: D) -> usize
    where
        F: FnMut(KeyRef<'_, T>, &V) -> bool,
        D: FnMut(V),
    {
        self.store
            .remove_where(|e| remove(e.key.view(), &e.value), |e| dispose(e.value))
    }

    // ----- whole-table operations -----

    /// Insert a copy of every entry into `dst`, replacing values of keys
    /// `dst` already holds.
    pub fn copy_into<'d, B>(&self, dst: &mut LocalTable<'d, V, T, B>) -> Result<()>
    where
        B: Allocator + Clone,
        T: Clone,
        V: Clone,
    {
        for e in self.store.iter() {
            dst.put(e.key.view(), e.value.clone())?;
        }
        Ok(())
    }

    /// Empty table with this table's hooks, thresholds and value policy,
    /// sized for `entries` and never shrinking before its first growth.
    pub(crate) fn sized_like<'n>(
        &self,
        entries: usize,
        policy: ResizePolicy,
    ) -> Result<LocalTable<'n, V, T, A>> {
        let mut settings = self.settings.clone();
        settings.resize = match policy {
            ResizePolicy::Frozen => ResizePolicy::Frozen,
            _ => ResizePolicy::FrozenUntilGrows,
        };
        let buckets = if entries == 0 {
            DEFAULT_SIZE
        } else {
            bucket_size(entries)
        };
        LocalTable::from_parts(buckets, settings, self.allocator().clone())
    }

    /// New table holding copies of both tables' entries; on shared keys the
    /// value from `b` wins. Configuration comes from `a`.
    pub fn merge<'n>(a: &Self, b: &Self, policy: ResizePolicy) -> Result<LocalTable<'n, V, T, A>>
    where
        T: Clone,
        V: Clone,
    {
        let mut out = a.sized_like(a.len() + b.len(), policy)?;
        a.copy_into(&mut out)?;
        b.copy_into(&mut out)?;
        Ok(out)
    }

    /// Drop the table, handing every remaining value to `dispose` instead of
    /// the value policy.
    pub fn dispose_with<D: FnMut(V)>(mut self, mut dispose: D) {
        self.store.drain_with(|e| dispose(e.value));
    }
}

/// `strncasecmp` over the key length: ASCII case-folded, ending early at a
/// NUL both keys share.
fn eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x.to_ascii_lowercase(), y.to_ascii_lowercase());
        if x != y {
            return false;
        }
        if x == 0 {
            return true;
        }
    }
    true
}

impl<'k, V, T, A: Allocator + Clone> Drop for LocalTable<'k, V, T, A> {
    fn drop(&mut self) {
        if let ValuePolicy::Dispose(Some(destroy)) = &self.settings.values {
            self.store.drain_with(|e| destroy(e.value));
        }
    }
}

impl<'k, V, T, A> fmt::Debug for LocalTable<'k, V, T, A>
where
    V: fmt::Debug,
    T: fmt::Debug,
    A: Allocator + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, 'k, V, T, A: Allocator + Clone> IntoIterator for &'a LocalTable<'k, V, T, A> {
    type Item = (KeyRef<'a, T>, &'a V);
    type IntoIter = Iter<'a, 'k, V, T, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::OpaqueKey;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    fn table() -> LocalTable<'static, u64> {
        LocalTable::new()
    }

    /// Invariant: A put is visible to get; replacing returns the old value
    /// under the default policy; delete then reports not-found.
    #[test]
    fn put_get_replace_delete() {
        let mut t = table();
        assert_eq!(t.put(b"alpha", 1), Ok(Put::Inserted));
        assert_eq!(t.get(b"alpha"), Some(&1));
        assert_eq!(
            t.put(b"alpha", 2),
            Ok(Put::Replaced { previous: Some(1) })
        );
        assert_eq!(t.len(), 1);
        assert_eq!(t.delete(b"alpha"), Some(2));
        assert_eq!(t.get(b"alpha"), None);
        assert!(!t.exists(b"alpha"));
        assert_eq!(t.delete(b"alpha"), None);
    }

    /// Invariant: A string key and its bytes plus terminator are the same key.
    #[test]
    fn string_keys_include_terminator() {
        let mut t = table();
        t.put(c"name", 7).unwrap();
        assert_eq!(t.get(b"name\0"), Some(&7));
        assert_eq!(t.get(b"name"), None);
        assert_eq!(t.keys().unwrap()[0].as_bytes(), Some(&b"name\0"[..]));
    }

    /// Invariant: Zero-length byte keys are ordinary content keys.
    #[test]
    fn empty_byte_key() {
        let mut t = table();
        t.put(b"", 1).unwrap();
        let other: Vec<u8> = Vec::new();
        assert_eq!(t.get(&other), Some(&1));
    }

    /// Invariant: Opaque keys match by identity only and land in the bucket
    /// their identity selects.
    #[test]
    fn opaque_keys_by_identity() {
        let (a, b) = (String::from("same"), String::from("same"));
        let mut t = table();
        t.put(OpaqueKey::of(&a), 1).unwrap();
        assert_eq!(t.get(OpaqueKey::of(&a)), Some(&1));
        assert_eq!(t.get(OpaqueKey::of(&b)), None);

        let mut t = LocalTable::<u64>::builder().initial_size(4).build_local().unwrap();
        for id in [1usize, 5, 9] {
            t.put(OpaqueKey::from_raw(id), id as u64).unwrap();
        }
        assert_eq!(t.buckets_used(), 1);
        assert_eq!(t.get(b"\x01\0\0\0\0\0\0\0"), None);
    }

    /// Invariant: Growth keeps the load factor at or below the high threshold.
    #[test]
    fn grows_past_high_threshold() {
        let mut t = table();
        for i in 0u64..100 {
            t.put(&i.to_le_bytes(), i).unwrap();
            assert!(t.len() as f32 / t.bucket_count() as f32 <= 0.75);
        }
        assert!(t.resized_count() > 0);
        for i in 0u64..100 {
            assert_eq!(t.get(&i.to_le_bytes()), Some(&i));
        }
    }

    /// Invariant: A table that never grew does not shrink under the default policy.
    #[test]
    fn frozen_until_grows_blocks_early_shrink() {
        let mut t = LocalTable::<u64>::builder().initial_size(64).build_local().unwrap();
        t.put(b"a", 1).unwrap();
        t.put(b"b", 2).unwrap();
        t.delete(b"a");
        assert_eq!(t.bucket_count(), 64);

        t.set_resize_policy(ResizePolicy::Auto);
        t.delete(b"b");
        assert_eq!(t.bucket_count(), 1);
        assert_eq!(t.resized_count(), 1);
    }

    /// Invariant: Frozen tables never resize on their own; rehash still works.
    #[test]
    fn frozen_never_resizes() {
        let mut t = LocalTable::<u64>::builder()
            .resize_policy(ResizePolicy::Frozen)
            .build_local()
            .unwrap();
        for i in 0u64..64 {
            t.put(&i.to_le_bytes(), i).unwrap();
        }
        assert_eq!(t.bucket_count(), 8);
        assert!(t.rehash());
        assert_eq!(t.bucket_count(), 128);
        assert!(!t.rehash());
    }

    /// Invariant: Case-insensitive tables collapse spellings into one entry
    /// and keep the first spelling as the stored key.
    #[test]
    fn ignore_case_collapses() {
        let mut t = LocalTable::<u64>::builder().ignore_case(true).build_local().unwrap();
        t.put(c"Key", 1).unwrap();
        assert_eq!(t.get(c"key"), Some(&1));
        assert_eq!(t.get(c"KEY"), Some(&1));
        assert!(!t.put(c"kEy", 2).unwrap().is_inserted());
        assert_eq!(t.len(), 1);
        let (k, v) = t.get_key_value(c"KEY").unwrap();
        assert_eq!((k.as_bytes(), *v), (Some(&b"Key\0"[..]), 2));
    }

    /// Invariant: Case folding stops at a NUL both keys share.
    #[test]
    fn ignore_case_stops_at_nul() {
        assert!(eq_ignore_case(b"AB\0x", b"ab\0y"));
        assert!(!eq_ignore_case(b"ABx", b"aby"));
        assert!(eq_ignore_case(b"", b""));
    }

    /// Invariant: A custom hash under case-insensitive mode hashes the
    /// lowercased key.
    #[test]
    fn custom_hash_sees_lowercase() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let mut t = LocalTable::<u64>::builder()
            .ignore_case(true)
            .hash_fn(move |b| {
                log.lock().unwrap().push(b.to_vec());
                b.len() as u32
            })
            .build_local()
            .unwrap();
        t.put(b"MiXed", 1).unwrap();
        assert_eq!(t.get(b"mixed"), Some(&1));
        assert!(seen.lock().unwrap().iter().all(|k| k == b"mixed"));
    }

    /// Invariant: A custom comparator decides equality for byte keys.
    #[test]
    fn custom_cmp_decides() {
        let mut t = LocalTable::<u64>::builder()
            .hash_fn(|b| u32::from(b.first().copied().unwrap_or(0)))
            .cmp_fn(|a, b| a[0].cmp(&b[0]))
            .build_local()
            .unwrap();
        t.put(b"xa", 1).unwrap();
        assert_eq!(t.get(b"xb"), Some(&1));
        assert_eq!(t.get(b"xab"), None);
    }

    /// Invariant: Hooks change only while the table is empty.
    #[test]
    fn hooks_need_empty_table() {
        let mut t = table();
        assert!(t.set_hash_fn(|_| 0).is_ok());
        assert!(t.set_ignore_case(true).is_ok());
        t.put(b"x", 1).unwrap();
        assert_eq!(t.set_cmp_fn(|a, b| a.cmp(b)), Err(TableError::NotEmpty { entries: 1 }));
        assert_eq!(t.set_schema(Schema::new()), Err(TableError::NotEmpty { entries: 1 }));
        assert_eq!(t.set_ignore_case(false), Err(TableError::NotEmpty { entries: 1 }));
        assert_eq!(t.set_thresholds(Some(0.5), Some(0.4)).map_err(|_| ()), Err(()));
        assert!(t.set_thresholds(None, Some(2.0)).is_ok());
        assert_eq!(t.thresholds().high, 2.0);
    }

    /// Invariant: Under a disposing policy replaced and deleted values go to
    /// the destructor and never back to the caller.
    #[test]
    fn destructor_consumes_values() {
        let freed = Arc::new(AtomicUsize::new(0));
        let f = freed.clone();
        let mut t = LocalTable::<u64>::builder()
            .destructor(move |v| {
                f.fetch_add(v as usize, AtomicOrdering::SeqCst);
            })
            .build_local()
            .unwrap();
        t.put(b"a", 1).unwrap();
        assert_eq!(t.put(b"a", 10), Ok(Put::Replaced { previous: None }));
        assert_eq!(freed.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(t.delete(b"a"), None);
        assert_eq!(freed.load(AtomicOrdering::SeqCst), 11);
        t.put(b"b", 100).unwrap();
        t.put(b"c", 1000).unwrap();
        t.clear();
        assert_eq!(freed.load(AtomicOrdering::SeqCst), 1111);
        t.put(b"d", 5).unwrap();
        drop(t);
        assert_eq!(freed.load(AtomicOrdering::SeqCst), 1116);
    }

    /// Invariant: dispose_with overrides the destructor for the final teardown.
    #[test]
    fn dispose_with_overrides() {
        let freed = Arc::new(AtomicUsize::new(0));
        let f = freed.clone();
        let mut t = LocalTable::<u64>::builder()
            .destructor(move |_| {
                f.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .build_local()
            .unwrap();
        t.put(b"a", 1).unwrap();
        t.put(b"b", 2).unwrap();
        let mut got = Vec::new();
        t.dispose_with(|v| got.push(v));
        got.sort_unstable();
        assert_eq!(got, vec![1, 2]);
        assert_eq!(freed.load(AtomicOrdering::SeqCst), 0);
    }

    /// Invariant: put_borrowed stores the caller's bytes, not a copy.
    #[test]
    fn borrowed_keys_are_not_copied() {
        let buf = b"borrowed-key".to_vec();
        let mut t: LocalTable<'_, u64> = LocalTable::new();
        t.put_borrowed(&buf, 1).unwrap();
        t.put(b"copied", 2).unwrap();
        let (k, _) = t.get_key_value(b"borrowed-key").unwrap();
        assert_eq!(k.as_bytes().map(<[u8]>::as_ptr), Some(buf.as_ptr()));
        let (k, _) = t.get_key_value(b"copied").unwrap();
        assert_ne!(k.as_bytes().map(<[u8]>::as_ptr), Some(b"copied".as_ptr()));
    }

    /// Invariant: Composite keys need a schema; with one they match structurally.
    #[test]
    fn composite_keys() {
        #[derive(Clone, Debug)]
        struct Pair {
            a: u32,
            b: u32,
        }
        let mut t: LocalTable<'_, &str, Pair> = LocalTable::new();
        let p = Pair { a: 1, b: 2 };
        assert_eq!(t.put(Key::Composite(&p), "one-two"), Err(TableError::MissingSchema));
        assert_eq!(t.get(Key::Composite(&p)), None);

        t.set_schema(
            Schema::new()
                .primitive("a", |p: &Pair| p.a)
                .primitive("b", |p: &Pair| p.b),
        )
        .unwrap();
        t.put(Key::Composite(&p), "one-two").unwrap();
        let q = Pair { a: 1, b: 2 };
        assert_eq!(t.get(Key::Composite(&q)), Some(&"one-two"));
        assert_eq!(t.get(Key::Composite(&Pair { a: 2, b: 1 })), None);
        assert_eq!(t.get(b"\x01\0\0\0\x02\0\0\0"), None);
    }

    /// Invariant: foreach visits every entry and stops at the first Break.
    #[test]
    fn foreach_counts_and_breaks() {
        let mut t = table();
        for i in 0u64..10 {
            t.put(&i.to_le_bytes(), i).unwrap();
        }
        assert_eq!(t.foreach(|_, _| ControlFlow::<()>::Continue(())), ControlFlow::Continue(10));
        let found = t.foreach(|k, v| {
            if *v == 7 {
                ControlFlow::Break(k.as_bytes().map(<[u8]>::to_vec))
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(found, ControlFlow::Break(Some(7u64.to_le_bytes().to_vec())));
    }

    /// Invariant: foreach_remove unlinks exactly the accepted entries and
    /// keeps the count consistent.
    #[test]
    fn foreach_remove_counts() {
        let mut t = table();
        for i in 0u64..20 {
            t.put(&i.to_le_bytes(), i).unwrap();
        }
        assert_eq!(t.foreach_remove(|_, v| v % 3 == 0), 7);
        assert_eq!(t.len(), 13);
        assert!(t.iter().all(|(_, v)| v % 3 != 0));
        let mut taken = Vec::new();
        assert_eq!(t.foreach_remove_with(|_, v| *v < 5, |v| taken.push(v)), 3);
        taken.sort_unstable();
        assert_eq!(taken, vec![1, 2, 4]);
    }

    /// Invariant: Independent cursors walk the same sequence as iter().
    #[test]
    fn cursors_are_independent() {
        let mut t = table();
        for i in 0u64..12 {
            t.put(&i.to_le_bytes(), i).unwrap();
        }
        let (mut c1, mut c2) = (t.each(), t.each());
        let first = t.next(&mut c1).map(|(_, v)| *v);
        let mut walked = vec![];
        while let Some((_, v)) = t.next(&mut c2) {
            walked.push(*v);
        }
        let expected: Vec<u64> = t.iter().map(|(_, v)| *v).collect();
        assert_eq!(walked, expected);
        assert_eq!(first, expected.first().copied());
        assert!(t.next(&mut c2).is_none());
    }

    /// Invariant: A cursor that outlives a removal keeps walking without
    /// revisiting vacated entries.
    #[test]
    fn cursor_survives_mutation() {
        let mut t = table();
        for i in 0u64..6 {
            t.put(&i.to_le_bytes(), i).unwrap();
        }
        let mut c = t.each();
        let _ = t.next(&mut c);
        t.foreach_remove(|_, _| true);
        assert!(t.next(&mut c).is_none());
    }

    /// Invariant: keys() copies, keys_fast() borrows live entries; both list
    /// every key once.
    #[test]
    fn key_snapshots() {
        let mut t = table();
        for i in 0u64..50 {
            t.put(&i.to_le_bytes(), i).unwrap();
        }
        let owned = t.keys().unwrap();
        let fast = t.keys_fast().unwrap();
        assert_eq!(owned.len(), 50);
        assert_eq!(fast.len(), 50);
        let mut uniq: Vec<_> = owned.iter().filter_map(OwnedKey::as_bytes).collect();
        uniq.sort_unstable();
        uniq.dedup();
        assert_eq!(uniq.len(), 50);
    }

    /// Invariant: Merge takes values from the second table on shared keys and
    /// never starts in Auto mode.
    #[test]
    fn merge_prefers_second() {
        let mut a = table();
        let mut b = table();
        a.put(b"shared", 1).unwrap();
        a.put(b"only-a", 2).unwrap();
        b.put(b"shared", 3).unwrap();
        let m: LocalTable<'_, u64> = LocalTable::merge(&a, &b, ResizePolicy::Auto).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(b"shared"), Some(&3));
        assert_eq!(m.resize_policy(), ResizePolicy::FrozenUntilGrows);
        let m = LocalTable::merge(&a, &b, ResizePolicy::Frozen).unwrap();
        assert_eq!(m.resize_policy(), ResizePolicy::Frozen);
        assert_eq!(m.bucket_count(), 4);
    }

    /// Invariant: copy_into makes fresh key copies in the destination.
    #[test]
    fn copy_into_duplicates_keys() {
        let buf = b"key".to_vec();
        let mut src: LocalTable<'_, u64> = LocalTable::new();
        src.put_borrowed(&buf, 1).unwrap();
        let mut dst = table();
        src.copy_into(&mut dst).unwrap();
        let (k, v) = dst.get_key_value(b"key").unwrap();
        assert_eq!(*v, 1);
        assert_ne!(k.as_bytes().map(<[u8]>::as_ptr), Some(buf.as_ptr()));
    }

    /// Invariant: Thresholds that ask for an unrepresentable bucket count
    /// leave the table at its current size instead of failing the put.
    #[test]
    fn extreme_thresholds_keep_current_buckets() {
        let mut t = table();
        t.set_thresholds(Some(0.0), Some(1e-18)).unwrap();
        assert_eq!(t.put(b"a", 1), Ok(Put::Inserted));
        assert_eq!(t.put(b"b", 2), Ok(Put::Inserted));
        assert_eq!(t.bucket_count(), DEFAULT_SIZE);
        assert_eq!(t.resized_count(), 0);
        assert!(!t.rehash());
        assert_eq!(t.get(b"a"), Some(&1));
        assert_eq!(t.delete(b"b"), Some(2));
    }

    /// Invariant: The value policy can only change while the table is empty.
    #[test]
    fn value_policy_fixed_while_populated() {
        let mut t = table();
        t.put(b"a", 1).unwrap();
        assert_eq!(
            t.set_value_policy(ValuePolicy::Dispose(None)),
            Err(TableError::NotEmpty { entries: 1 })
        );
        assert!(!t.value_policy().is_dispose());
        assert_eq!(t.delete(b"a"), Some(1));
        t.set_value_policy(ValuePolicy::Dispose(None)).unwrap();
        t.put(b"a", 2).unwrap();
        assert_eq!(t.delete(b"a"), None);
    }

    /// Invariant: Debug renders the table as a map of its entries.
    #[test]
    fn debug_prints_map() {
        let mut t = table();
        t.put(c"k", 1).unwrap();
        assert_eq!(format!("{:?}", t), r#"{"k": 1}"#);
    }
}
