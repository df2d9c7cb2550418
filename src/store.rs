//! Bucket store: power-of-two chain heads over an entry arena.
//!
//! Entries live in `slots`; chains link them by index, so unlinking never
//! moves an entry. Vacated slots form a free list threaded through the
//! arena. Each entry keeps the hash it was inserted with, which is all a
//! rehash needs: relinking runs no user code. A rehash also rebuilds the
//! arena densely, so memory held for deleted entries goes back to the
//! allocator whenever the table resizes.
//!
//! Both arrays are allocated through the table allocator.

use crate::cursor::Cursor;
use crate::error::{Result, TableError};
use crate::key::StoredKey;
use allocator_api2::alloc::Allocator;
use allocator_api2::vec::Vec as AllocVec;
use core::mem;

pub(crate) struct Entry<'k, V, T, A: Allocator> {
    pub(crate) key: StoredKey<'k, T, A>,
    pub(crate) value: V,
    pub(crate) hash: usize,
    next: Option<usize>,
}

impl<'k, V, T, A: Allocator> Entry<'k, V, T, A> {
    pub(crate) fn new(key: StoredKey<'k, T, A>, value: V, hash: usize) -> Self {
        Self {
            key,
            value,
            hash,
            next: None,
        }
    }
}

enum Slot<E> {
    Occupied(E),
    Vacant { next_free: Option<usize> },
}

pub(crate) struct Store<'k, V, T, A: Allocator + Clone> {
    buckets: AllocVec<Option<usize>, A>,
    slots: AllocVec<Slot<Entry<'k, V, T, A>>, A>,
    free: Option<usize>,
    len: usize,
}

/// Largest bucket count a table asks its allocator for.
pub(crate) const MAX_BUCKETS: usize = 1 << (usize::BITS - 6);

fn reserved_in<X, A: Allocator>(count: usize, alloc: A) -> Result<AllocVec<X, A>> {
    let mut v = AllocVec::new_in(alloc);
    v.try_reserve_exact(count).map_err(|_| TableError::AllocFailed {
        bytes: count.saturating_mul(mem::size_of::<X>()),
    })?;
    Ok(v)
}

fn heads_in<A: Allocator>(count: usize, alloc: A) -> Result<AllocVec<Option<usize>, A>> {
    let mut heads = reserved_in(count, alloc)?;
    for _ in 0..count {
        heads.push(None);
    }
    Ok(heads)
}

impl<'k, V, T, A: Allocator + Clone> Store<'k, V, T, A> {
    /// `buckets` must be a power of two.
    pub(crate) fn with_buckets_in(buckets: usize, alloc: A) -> Result<Self> {
        debug_assert!(buckets.is_power_of_two());
        Ok(Self {
            buckets: heads_in(buckets, alloc.clone())?,
            slots: AllocVec::new_in(alloc),
            free: None,
            len: 0,
        })
    }

    /// Like [`Store::with_buckets_in`], aborting on allocation failure the way
    /// std collections do.
    pub(crate) fn new_in(buckets: usize, alloc: A) -> Self {
        debug_assert!(buckets.is_power_of_two());
        let mut heads = AllocVec::with_capacity_in(buckets, alloc.clone());
        heads.extend(core::iter::repeat(None).take(buckets));
        Self {
            buckets: heads,
            slots: AllocVec::new_in(alloc),
            free: None,
            len: 0,
        }
    }

    pub(crate) fn allocator(&self) -> &A {
        self.slots.allocator()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn buckets_used(&self) -> usize {
        self.buckets.iter().filter(|h| h.is_some()).count()
    }

    #[inline]
    fn bucket_of(&self, hash: usize) -> usize {
        hash & (self.buckets.len() - 1)
    }

    #[inline]
    pub(crate) fn entry(&self, idx: usize) -> Option<&Entry<'k, V, T, A>> {
        match self.slots.get(idx) {
            Some(Slot::Occupied(e)) => Some(e),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn entry_mut(&mut self, idx: usize) -> Option<&mut Entry<'k, V, T, A>> {
        match self.slots.get_mut(idx) {
            Some(Slot::Occupied(e)) => Some(e),
            _ => None,
        }
    }

    /// First entry in the chain for `hash` accepted by `matches`, with its
    /// predecessor in the chain.
    pub(crate) fn find<F>(&self, hash: usize, mut matches: F) -> Option<(Option<usize>, usize)>
    where
        F: FnMut(&Entry<'k, V, T, A>) -> bool,
    {
        let mut prev = None;
        let mut cur = self.buckets[self.bucket_of(hash)];
        while let Some(idx) = cur {
            let e = self.entry(idx)?;
            if matches(e) {
                return Some((prev, idx));
            }
            prev = Some(idx);
            cur = e.next;
        }
        None
    }

    /// Link `entry` at the head of its chain.
    pub(crate) fn insert(&mut self, mut entry: Entry<'k, V, T, A>) -> Result<usize> {
        let bucket = self.bucket_of(entry.hash);
        entry.next = self.buckets[bucket];
        let idx = match self.free {
            Some(idx) => {
                if let Slot::Vacant { next_free } = self.slots[idx] {
                    self.free = next_free;
                }
                self.slots[idx] = Slot::Occupied(entry);
                idx
            }
            None => {
                self.slots.try_reserve(1).map_err(|_| TableError::AllocFailed {
                    bytes: mem::size_of::<Slot<Entry<'k, V, T, A>>>(),
                })?;
                self.slots.push(Slot::Occupied(entry));
                self.slots.len() - 1
            }
        };
        self.buckets[bucket] = Some(idx);
        self.len += 1;
        Ok(idx)
    }

    /// Unlink the entry at `idx`; `prev` is its chain predecessor as
    /// reported by [`Store::find`].
    pub(crate) fn remove(&mut self, prev: Option<usize>, idx: usize) -> Option<Entry<'k, V, T, A>> {
        let vacant = Slot::Vacant {
            next_free: self.free,
        };
        let entry = match mem::replace(self.slots.get_mut(idx)?, vacant) {
            Slot::Occupied(e) => e,
            old @ Slot::Vacant { .. } => {
                self.slots[idx] = old;
                return None;
            }
        };
        match prev {
            Some(p) => {
                if let Some(pe) = self.entry_mut(p) {
                    pe.next = entry.next;
                }
            }
            None => {
                let bucket = self.bucket_of(entry.hash);
                self.buckets[bucket] = entry.next;
            }
        }
        self.free = Some(idx);
        self.len -= 1;
        Some(entry)
    }

    /// Relink every entry into `count` fresh buckets, packing the arena to
    /// exactly the live entries. On allocation failure nothing changes.
    pub(crate) fn resize(&mut self, count: usize) -> Result<()> {
        debug_assert!(count.is_power_of_two());
        let heads = heads_in(count, self.buckets.allocator().clone())?;
        let packed = reserved_in(self.len, self.slots.allocator().clone())?;
        self.buckets = heads;
        let old = mem::replace(&mut self.slots, packed);
        for slot in old {
            if let Slot::Occupied(mut e) = slot {
                let bucket = self.bucket_of(e.hash);
                e.next = self.buckets[bucket];
                self.buckets[bucket] = Some(self.slots.len());
                self.slots.push(Slot::Occupied(e));
            }
        }
        self.free = None;
        Ok(())
    }

    /// Remove every entry, handing each to `sink` in bucket order.
    pub(crate) fn drain_with<F>(&mut self, mut sink: F)
    where
        F: FnMut(Entry<'k, V, T, A>),
    {
        for bucket in 0..self.buckets.len() {
            while let Some(head) = self.buckets[bucket] {
                match self.remove(None, head) {
                    Some(e) => sink(e),
                    None => self.buckets[bucket] = None,
                }
            }
        }
        self.slots = AllocVec::new_in(self.slots.allocator().clone());
        self.free = None;
        self.len = 0;
    }

    /// Remove the entries `remove` accepts, in bucket then chain order.
    /// Returns how many were removed.
    pub(crate) fn remove_where<P, F>(&mut self, mut remove: P, mut sink: F) -> usize
    where
        P: FnMut(&Entry<'k, V, T, A>) -> bool,
        F: FnMut(Entry<'k, V, T, A>),
    {
        let mut removed = 0;
        for bucket in 0..self.buckets.len() {
            let mut prev = None;
            let mut cur = self.buckets[bucket];
            while let Some(idx) = cur {
                let Some(e) = self.entry(idx) else { break };
                cur = e.next;
                if remove(e) {
                    if let Some(e) = self.remove(prev, idx) {
                        sink(e);
                        removed += 1;
                    }
                } else {
                    prev = Some(idx);
                }
            }
        }
        removed
    }

    /// Advance `cursor`, returning the index of the entry it was on.
    ///
    /// A cursor that outlived a mutation keeps walking without touching
    /// vacated slots; which entries it then yields is unspecified.
    pub(crate) fn advance(&self, cursor: &mut Cursor) -> Option<usize> {
        loop {
            if let Some(idx) = cursor.next.take() {
                if let Some(e) = self.entry(idx) {
                    cursor.next = e.next;
                    if e.next.is_none() {
                        cursor.bucket += 1;
                    }
                    return Some(idx);
                }
                cursor.bucket += 1;
            }
            match *self.buckets.get(cursor.bucket)? {
                Some(head) => cursor.next = Some(head),
                None => cursor.bucket += 1,
            }
        }
    }

    /// Entries in bucket then chain order.
    pub(crate) fn iter(&self) -> Entries<'_, 'k, V, T, A> {
        Entries {
            store: self,
            cursor: Cursor::new(),
        }
    }
}

pub(crate) struct Entries<'s, 'k, V, T, A: Allocator + Clone> {
    store: &'s Store<'k, V, T, A>,
    cursor: Cursor,
}

impl<'s, 'k, V, T, A: Allocator + Clone> Iterator for Entries<'s, 'k, V, T, A> {
    type Item = &'s Entry<'k, V, T, A>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.store.advance(&mut self.cursor)?;
        self.store.entry(idx)
    }
}
