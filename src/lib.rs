//! chained-hashtable: a thread-safe, resizable hash table with separate
//! chaining, three kinds of keys, and caller-chosen memory and value
//! ownership.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: one table engine usable both behind its own lock and under the
//!   caller's synchronization, with keys that need no per-type hash code.
//! - Layers:
//!   - `hash`: the one-at-a-time avalanche hash, one-shot and streaming.
//!   - `schema`: `Schema<T>`, a declarative field list from which one
//!     walker derives a structural hash and a total order for composite
//!     keys.
//!   - `store`: power-of-two bucket heads and an entry arena, both
//!     allocated through the table allocator; chains link entries by index.
//!   - `LocalTable<'k, V, T, A>`: every table operation, growth and shrink
//!     policy, and both traversal protocols, with no lock.
//!   - `Table<'k, V, T, A>`: a `LocalTable` behind a `parking_lot` mutex.
//!
//! Keys
//! - `Key::Bytes` / `Key::Str`: content keys. A `Str` key is its bytes
//!   including the NUL terminator.
//! - `Key::Opaque`: identity keys. The identity masked to the bucket count
//!   picks the bucket; only the same identity matches.
//! - `Key::Composite(&T)`: hashed and compared through the table's
//!   `Schema<T>`. A table without a schema rejects them on insert and
//!   never finds them.
//! - Keys of different kinds never match.
//!
//! Constraints
//! - Bucket counts are powers of two; the bucket is `hash & (count - 1)`.
//! - Chains are head-inserted; no order within a chain is promised.
//! - Each entry stores its hash and rehashing relinks by the stored hash,
//!   so a resize never runs user code. It also packs the entry arena, so
//!   memory held for deleted entries returns to the allocator. Hash,
//!   comparison, schema, case mode and value policy are fixed while the
//!   table holds entries (`TableError::NotEmpty`).
//! - `put` copies keys through the allocator; `put_borrowed` keeps the
//!   caller's reference for the table lifetime `'k`.
//!
//! Resize policy
//! - After an insert, a load factor above `high` grows the table unless it
//!   is `Frozen`.
//! - After a delete or clear, a load factor below `low` shrinks it unless
//!   it is `Frozen`, or `FrozenUntilGrows` (the default) with no resize yet.
//! - The target size is the smallest power of two not below
//!   `2 * entries / (low + high)`.
//!
//! Value ownership
//! - `ValuePolicy::Return`: superseded and deleted values go back to the
//!   caller.
//! - `ValuePolicy::Dispose`: the table consumes them, running the
//!   destructor if one is set; callers get `None` instead.
//!
//! Concurrency
//! - `Table` locks per call. `foreach`/`foreach_remove` hold the lock for
//!   the whole walk. A callback re-entering the same table panics in debug
//!   builds rather than deadlocking.
//! - `LocalTable` is the lock-free variant: the caller owns all
//!   synchronization, and the borrow checker enforces it.
//!
//! Notes and non-goals
//! - No open addressing, no lock-free structure, no persistence.
//! - Cursors are independent values. Mutating a table under a live cursor
//!   is memory-safe, but what the cursor yields afterwards is unspecified.
//!
//! ```
//! use chained_hashtable::{Key, Put, Schema, Table};
//!
//! let t: Table<'_, &str> = Table::new();
//! assert_eq!(t.put(c"Hello", "world").unwrap(), Put::Inserted);
//! assert_eq!(t.get(c"Hello"), Some("world"));
//!
//! #[derive(Clone)]
//! struct Point { x: i32, y: i32 }
//! let schema = Schema::new()
//!     .primitive("x", |p: &Point| p.x)
//!     .primitive("y", |p: &Point| p.y);
//! let points = Table::<u32, Point>::builder().schema(schema).build().unwrap();
//! points.put(Key::Composite(&Point { x: 1, y: 2 }), 12).unwrap();
//! assert_eq!(points.get(Key::Composite(&Point { x: 1, y: 2 })), Some(12));
//! ```

mod config;
mod cursor;
mod error;
pub mod hash;
mod key;
mod local_table;
mod local_table_proptest;
mod reentrancy;
pub mod schema;
mod store;
mod table;

// Public surface
pub use config::{
    CmpFn, Destructor, HashFn, ResizePolicy, TableBuilder, Thresholds, ValuePolicy, DEFAULT_SIZE,
};
pub use cursor::{Cursor, Iter};
pub use error::{Result, TableError};
pub use key::{Key, KeyRef, OpaqueKey, OwnedKey};
pub use local_table::{LocalTable, Put};
pub use schema::{FieldKind, Primitive, Schema};
pub use table::{Table, TableGuard};
