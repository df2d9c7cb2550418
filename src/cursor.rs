//! Traversal positions over a table.

use crate::key::KeyRef;
use crate::store::Entries;
use allocator_api2::alloc::Allocator;

/// Position of a stateful traversal, started by `each` and advanced by `next`.
///
/// A cursor is a plain value: any number of traversals may run side by side.
/// Mutating the table while a cursor is live is memory-safe, but which
/// entries the cursor yields afterwards is unspecified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub(crate) bucket: usize,
    pub(crate) next: Option<usize>,
}

impl Cursor {
    pub(crate) const fn new() -> Self {
        Cursor {
            bucket: 0,
            next: None,
        }
    }
}

/// Borrowing iterator over `(key, value)` pairs in bucket order.
pub struct Iter<'a, 'k, V, T, A: Allocator + Clone> {
    pub(crate) entries: Entries<'a, 'k, V, T, A>,
}

impl<'a, 'k, V, T, A: Allocator + Clone> Iterator for Iter<'a, 'k, V, T, A> {
    type Item = (KeyRef<'a, T>, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|e| (e.key.view(), &e.value))
    }
}
