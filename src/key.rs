//! Key kinds accepted and stored by the table.
//!
//! - Byte keys are hashed and compared by content. A NUL-terminated string
//!   (`Key::Str`) is the same key as its bytes including the terminator.
//! - Opaque keys carry an identity (usually an address). They hash by that
//!   identity and only ever match the same identity.
//! - Composite keys are typed values described by a `Schema`.
//!
//! Keys of different kinds never match each other.

use crate::error::{Result, TableError};
use allocator_api2::alloc::{Allocator, Global};
use allocator_api2::vec::Vec as AllocVec;
use core::ffi::CStr;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::mem;

/// Identity used as a key: equal only to itself, never inspected.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OpaqueKey(usize);

impl OpaqueKey {
    /// Identity of the value behind `r` (its address).
    pub fn of<R: ?Sized>(r: &R) -> Self {
        OpaqueKey(r as *const R as *const () as usize)
    }

    pub const fn from_raw(id: usize) -> Self {
        OpaqueKey(id)
    }

    pub const fn id(self) -> usize {
        self.0
    }
}

/// A key as passed by callers.
pub enum Key<'a, T = ()> {
    Bytes(&'a [u8]),
    /// String key; stored and compared with its NUL terminator.
    Str(&'a CStr),
    Opaque(OpaqueKey),
    Composite(&'a T),
}

impl<'a, T> Key<'a, T> {
    /// Resolve the string sentinel into plain bytes.
    pub fn normalize(self) -> KeyRef<'a, T> {
        match self {
            Key::Bytes(b) => KeyRef::Bytes(b),
            Key::Str(s) => KeyRef::Bytes(s.to_bytes_with_nul()),
            Key::Opaque(id) => KeyRef::Opaque(id),
            Key::Composite(c) => KeyRef::Composite(c),
        }
    }
}

impl<'a, T> From<&'a [u8]> for Key<'a, T> {
    fn from(b: &'a [u8]) -> Self {
        Key::Bytes(b)
    }
}

impl<'a, T, const N: usize> From<&'a [u8; N]> for Key<'a, T> {
    fn from(b: &'a [u8; N]) -> Self {
        Key::Bytes(b)
    }
}

impl<'a, T> From<&'a Vec<u8>> for Key<'a, T> {
    fn from(b: &'a Vec<u8>) -> Self {
        Key::Bytes(b)
    }
}

impl<'a, T> From<&'a CStr> for Key<'a, T> {
    fn from(s: &'a CStr) -> Self {
        Key::Str(s)
    }
}

impl<'a, T> From<OpaqueKey> for Key<'a, T> {
    fn from(id: OpaqueKey) -> Self {
        Key::Opaque(id)
    }
}

impl<'a, T> From<KeyRef<'a, T>> for Key<'a, T> {
    fn from(k: KeyRef<'a, T>) -> Self {
        match k {
            KeyRef::Bytes(b) => Key::Bytes(b),
            KeyRef::Opaque(id) => Key::Opaque(id),
            KeyRef::Composite(c) => Key::Composite(c),
        }
    }
}

/// Borrowed view of a key, as looked up or as stored in an entry.
pub enum KeyRef<'a, T = ()> {
    Bytes(&'a [u8]),
    Opaque(OpaqueKey),
    Composite(&'a T),
}

impl<'a, T> Clone for KeyRef<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for KeyRef<'a, T> {}

impl<'a, T: fmt::Debug> fmt::Debug for KeyRef<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRef::Bytes(b) => write!(f, "{:?}", Lossy(b)),
            KeyRef::Opaque(id) => write!(f, "#{:x}", id.id()),
            KeyRef::Composite(c) => c.fmt(f),
        }
    }
}

impl<'a, T> KeyRef<'a, T> {
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            KeyRef::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Independent copy of the key on the global heap.
    pub fn to_owned_key(&self) -> OwnedKey<T>
    where
        T: Clone,
    {
        match *self {
            KeyRef::Bytes(b) => {
                let mut copy = AllocVec::with_capacity_in(b.len(), Global);
                copy.extend_from_slice(b);
                OwnedKey::Bytes(copy)
            }
            KeyRef::Opaque(id) => OwnedKey::Opaque(id),
            KeyRef::Composite(c) => OwnedKey::Composite(c.clone()),
        }
    }

    /// Independent copy of the key, its bytes allocated from `alloc`.
    pub fn to_owned_key_in<A: Allocator>(&self, alloc: A) -> Result<OwnedKey<T, A>>
    where
        T: Clone,
    {
        Ok(match *self {
            KeyRef::Bytes(b) => {
                let mut copy = AllocVec::new_in(alloc);
                copy.try_reserve_exact(b.len())
                    .map_err(|_| TableError::AllocFailed { bytes: b.len() })?;
                copy.extend_from_slice(b);
                OwnedKey::Bytes(copy)
            }
            KeyRef::Opaque(id) => OwnedKey::Opaque(id),
            KeyRef::Composite(c) => OwnedKey::Composite(c.clone()),
        })
    }
}

/// Key copy detached from any table. Byte keys live in `A`.
pub enum OwnedKey<T = (), A: Allocator = Global> {
    Bytes(AllocVec<u8, A>),
    Opaque(OpaqueKey),
    Composite(T),
}

impl<T, A: Allocator> OwnedKey<T, A> {
    pub fn as_key(&self) -> Key<'_, T> {
        match self {
            OwnedKey::Bytes(b) => Key::Bytes(b.as_slice()),
            OwnedKey::Opaque(id) => Key::Opaque(*id),
            OwnedKey::Composite(c) => Key::Composite(c),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            OwnedKey::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }
}

impl<T: Clone, A: Allocator + Clone> Clone for OwnedKey<T, A> {
    fn clone(&self) -> Self {
        match self {
            OwnedKey::Bytes(b) => OwnedKey::Bytes(b.clone()),
            OwnedKey::Opaque(id) => OwnedKey::Opaque(*id),
            OwnedKey::Composite(c) => OwnedKey::Composite(c.clone()),
        }
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for OwnedKey<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnedKey::Bytes(b) => f.debug_tuple("Bytes").field(&Lossy(b.as_slice())).finish(),
            OwnedKey::Opaque(id) => f.debug_tuple("Opaque").field(id).finish(),
            OwnedKey::Composite(c) => f.debug_tuple("Composite").field(c).finish(),
        }
    }
}

impl<T: PartialEq, A: Allocator> PartialEq for OwnedKey<T, A> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OwnedKey::Bytes(a), OwnedKey::Bytes(b)) => a.as_slice() == b.as_slice(),
            (OwnedKey::Opaque(a), OwnedKey::Opaque(b)) => a == b,
            (OwnedKey::Composite(a), OwnedKey::Composite(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: Eq, A: Allocator> Eq for OwnedKey<T, A> {}

impl<T: Hash, A: Allocator> Hash for OwnedKey<T, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            OwnedKey::Bytes(b) => b.as_slice().hash(state),
            OwnedKey::Opaque(id) => id.hash(state),
            OwnedKey::Composite(c) => c.hash(state),
        }
    }
}

// Byte keys are usually text; show them as such.
struct Lossy<'a>(&'a [u8]);

impl fmt::Debug for Lossy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trimmed = self.0.strip_suffix(&[0]).unwrap_or(self.0);
        fmt::Debug::fmt(&String::from_utf8_lossy(trimmed), f)
    }
}

/// Key as held by an entry: a copy made through the table allocator, or
/// the caller's own reference when inserted without copying.
pub(crate) enum StoredKey<'k, T, A: Allocator> {
    Bytes(AllocVec<u8, A>),
    BorrowedBytes(&'k [u8]),
    Opaque(OpaqueKey),
    Composite(T),
    BorrowedComposite(&'k T),
}

impl<'k, T, A: Allocator> StoredKey<'k, T, A> {
    pub(crate) fn view(&self) -> KeyRef<'_, T> {
        match self {
            StoredKey::Bytes(b) => KeyRef::Bytes(b),
            StoredKey::BorrowedBytes(b) => KeyRef::Bytes(b),
            StoredKey::Opaque(id) => KeyRef::Opaque(*id),
            StoredKey::Composite(c) => KeyRef::Composite(c),
            StoredKey::BorrowedComposite(c) => KeyRef::Composite(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: A string key normalizes to its bytes plus the terminator.
    #[test]
    fn str_key_includes_terminator() {
        let k: Key<'_> = Key::Str(c"hello");
        match k.normalize() {
            KeyRef::Bytes(b) => assert_eq!(b, b"hello\0"),
            _ => panic!("string keys are byte keys"),
        }
    }

    /// Invariant: Opaque identities follow the address of the referenced value.
    #[test]
    fn opaque_identity_is_address() {
        let a = 1u64;
        let b = 1u64;
        assert_eq!(OpaqueKey::of(&a), OpaqueKey::of(&a));
        assert_ne!(OpaqueKey::of(&a), OpaqueKey::of(&b));
        assert_eq!(OpaqueKey::from_raw(42).id(), 42);
    }

    /// Invariant: Owned copies round-trip back into equivalent keys.
    #[test]
    fn owned_key_round_trip() {
        let raw = b"abc".to_vec();
        let owned = KeyRef::<()>::Bytes(&raw).to_owned_key();
        assert_eq!(owned.as_bytes(), Some(&b"abc"[..]));
        match owned.as_key().normalize() {
            KeyRef::Bytes(b) => assert!(!core::ptr::eq(b.as_ptr(), raw.as_ptr())),
            _ => panic!("expected bytes"),
        }
    }

    /// Invariant: Copies made in an allocator equal heap copies of the same key.
    #[test]
    fn owned_key_in_allocator_matches_heap_copy() {
        let key = KeyRef::<()>::Bytes(b"abc");
        let placed = key.to_owned_key_in(Global).unwrap();
        assert_eq!(placed, key.to_owned_key());
        assert_ne!(placed, KeyRef::<()>::Opaque(OpaqueKey::from_raw(1)).to_owned_key());
    }
}
