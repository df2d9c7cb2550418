//! Hash engine: the one-at-a-time avalanche hash.
//!
//! Each input byte is mixed into a 32-bit state; a three-step finalization
//! spreads the result across all bits so that masking to a small power of
//! two still distributes well. The streaming form (`OneAtATime`) lets the
//! schema interpreter accumulate over a whole key tree and finalize once.

use core::hash::{BuildHasher, Hasher};

#[inline]
fn mix(mut h: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        h = h.wrapping_add(u32::from(b));
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h
}

#[inline]
fn finalize(mut h: u32) -> u32 {
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);
    h
}

/// Hash a byte slice with the default table hash.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    finalize(mix(0, bytes))
}

/// Same as [`hash_bytes`] over the ASCII-lowercased input, without copying it.
pub fn hash_bytes_ignore_case(bytes: &[u8]) -> u32 {
    let mut h = 0u32;
    for &b in bytes {
        h = mix(h, &[b.to_ascii_lowercase()]);
    }
    finalize(h)
}

/// Streaming one-at-a-time state.
///
/// `write` mixes, `finish32` finalizes; finishing does not consume the state,
/// so more bytes may still be mixed in afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OneAtATime {
    state: u32,
}

impl OneAtATime {
    pub const fn new() -> Self {
        Self { state: 0 }
    }

    /// The finalized 32-bit hash of everything written so far.
    pub fn finish32(&self) -> u32 {
        finalize(self.state)
    }
}

impl Hasher for OneAtATime {
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.state = mix(self.state, bytes);
    }

    fn finish(&self) -> u64 {
        u64::from(self.finish32())
    }
}

/// `BuildHasher` for [`OneAtATime`], for use with std/hashbrown maps.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildOneAtATime;

impl BuildHasher for BuildOneAtATime {
    type Hasher = OneAtATime;

    fn build_hasher(&self) -> Self::Hasher {
        OneAtATime::new()
    }
}
