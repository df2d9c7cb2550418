//! Table configuration: resize policy, thresholds, value ownership, hooks,
//! and the `TableBuilder` that assembles them.

use crate::error::{Result, TableError};
use crate::local_table::LocalTable;
use crate::schema::Schema;
use crate::table::Table;
use allocator_api2::alloc::{Allocator, Global};
use core::cmp::Ordering;
use core::fmt;
use std::sync::Arc;

/// Bucket count used when no initial size is requested.
pub const DEFAULT_SIZE: usize = 8;

/// Replacement for the default byte-key hash.
pub type HashFn = Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Replacement for byte-key comparison. Only `Equal` matters for lookups.
pub type CmpFn = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Runs on every value the table consumes.
pub type Destructor<V> = Arc<dyn Fn(V) + Send + Sync>;

/// When the bucket array may be resized automatically.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ResizePolicy {
    /// Grow and shrink as the load factor crosses the thresholds.
    Auto,
    /// Never resize automatically; `rehash` still works.
    Frozen,
    /// Grow freely, but shrink only once the table has grown at least once.
    #[default]
    FrozenUntilGrows,
}

/// Load factor bounds (entries per bucket).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Thresholds {
    pub low: f32,
    pub high: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 0.25,
            high: 0.75,
        }
    }
}

impl Thresholds {
    /// Apply a partial update. `None` or a negative value keeps the current side.
    pub fn update(self, low: Option<f32>, high: Option<f32>) -> Result<Self> {
        let keep = |new: Option<f32>, old: f32| match new {
            Some(v) if v >= 0.0 => v,
            _ => old,
        };
        let next = Thresholds {
            low: keep(low, self.low),
            high: keep(high, self.high),
        };
        next.validate()?;
        Ok(next)
    }

    pub(crate) fn validate(self) -> Result<()> {
        if self.high < self.low {
            tracing::warn!(low = self.low, high = self.high, "rejecting inverted thresholds");
            return Err(TableError::InvalidThresholds {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }
}

/// Who owns values once the table lets go of them.
pub enum ValuePolicy<V> {
    /// Superseded and removed values go back to the caller.
    Return,
    /// The table consumes them, through the destructor when one is set.
    Dispose(Option<Destructor<V>>),
}

impl<V> ValuePolicy<V> {
    pub fn is_dispose(&self) -> bool {
        matches!(self, ValuePolicy::Dispose(_))
    }

    pub(crate) fn dispose(&self, value: V) {
        if let ValuePolicy::Dispose(Some(destroy)) = self {
            destroy(value);
        }
    }

    /// `Some(value)` when it belongs to the caller, `None` once disposed.
    pub(crate) fn release(&self, value: V) -> Option<V> {
        match self {
            ValuePolicy::Return => Some(value),
            ValuePolicy::Dispose(_) => {
                self.dispose(value);
                None
            }
        }
    }
}

impl<V> Default for ValuePolicy<V> {
    fn default() -> Self {
        ValuePolicy::Return
    }
}

impl<V> Clone for ValuePolicy<V> {
    fn clone(&self) -> Self {
        match self {
            ValuePolicy::Return => ValuePolicy::Return,
            ValuePolicy::Dispose(d) => ValuePolicy::Dispose(d.clone()),
        }
    }
}

impl<V> fmt::Debug for ValuePolicy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePolicy::Return => f.write_str("Return"),
            ValuePolicy::Dispose(None) => f.write_str("Dispose"),
            ValuePolicy::Dispose(Some(_)) => f.write_str("Dispose(destructor)"),
        }
    }
}

/// Everything about a table except its storage.
pub(crate) struct Settings<V, T> {
    pub(crate) hash_fn: Option<HashFn>,
    pub(crate) cmp_fn: Option<CmpFn>,
    pub(crate) schema: Option<Arc<Schema<T>>>,
    pub(crate) ignore_case: bool,
    pub(crate) thresholds: Thresholds,
    pub(crate) resize: ResizePolicy,
    pub(crate) values: ValuePolicy<V>,
}

impl<V, T> Default for Settings<V, T> {
    fn default() -> Self {
        Self {
            hash_fn: None,
            cmp_fn: None,
            schema: None,
            ignore_case: false,
            thresholds: Thresholds::default(),
            resize: ResizePolicy::default(),
            values: ValuePolicy::default(),
        }
    }
}

impl<V, T> Clone for Settings<V, T> {
    fn clone(&self) -> Self {
        Self {
            hash_fn: self.hash_fn.clone(),
            cmp_fn: self.cmp_fn.clone(),
            schema: self.schema.clone(),
            ignore_case: self.ignore_case,
            thresholds: self.thresholds,
            resize: self.resize,
            values: self.values.clone(),
        }
    }
}

impl<V, T> fmt::Debug for Settings<V, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("hash_fn", &self.hash_fn.is_some())
            .field("cmp_fn", &self.cmp_fn.is_some())
            .field("schema", &self.schema.as_ref().map(|s| s.len()))
            .field("ignore_case", &self.ignore_case)
            .field("thresholds", &self.thresholds)
            .field("resize", &self.resize)
            .field("values", &self.values)
            .finish()
    }
}

/// Smallest power of two not below `n` (1 for 0).
pub(crate) fn bucket_size(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Builder for [`LocalTable`] and [`Table`].
///
/// ```
/// use chained_hashtable::{ResizePolicy, TableBuilder};
///
/// let t = TableBuilder::<u32>::new()
///     .initial_size(100)
///     .ignore_case(true)
///     .resize_policy(ResizePolicy::Auto)
///     .build()
///     .unwrap();
/// assert_eq!(t.bucket_count(), 128);
/// ```
pub struct TableBuilder<V, T = (), A = Global> {
    initial_size: usize,
    settings: Settings<V, T>,
    alloc: A,
}

impl<V, T> TableBuilder<V, T, Global> {
    pub fn new() -> Self {
        Self {
            initial_size: DEFAULT_SIZE,
            settings: Settings::default(),
            alloc: Global,
        }
    }
}

impl<V, T> Default for TableBuilder<V, T, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, T, A> TableBuilder<V, T, A>
where
    A: Allocator + Clone,
{
    /// Starting bucket count, rounded up to a power of two. Zero means the default.
    pub fn initial_size(mut self, size: usize) -> Self {
        self.initial_size = if size == 0 {
            DEFAULT_SIZE
        } else {
            bucket_size(size)
        };
        self
    }

    /// ASCII case-insensitive byte keys.
    pub fn ignore_case(mut self, on: bool) -> Self {
        self.settings.ignore_case = on;
        self
    }

    pub fn resize_policy(mut self, policy: ResizePolicy) -> Self {
        self.settings.resize = policy;
        self
    }

    /// Checked when the table is built.
    pub fn thresholds(mut self, low: f32, high: f32) -> Self {
        self.settings.thresholds = Thresholds { low, high };
        self
    }

    pub fn hash_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> u32 + Send + Sync + 'static,
    {
        self.settings.hash_fn = Some(Arc::new(f));
        self
    }

    pub fn cmp_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    {
        self.settings.cmp_fn = Some(Arc::new(f));
        self
    }

    /// Describes composite keys; required before any `Key::Composite` is stored.
    pub fn schema(mut self, schema: Schema<T>) -> Self {
        self.settings.schema = Some(Arc::new(schema));
        self
    }

    /// Values are consumed by the table and passed to `f`.
    pub fn destructor<F>(mut self, f: F) -> Self
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        self.settings.values = ValuePolicy::Dispose(Some(Arc::new(f)));
        self
    }

    /// Values are consumed by the table and dropped.
    pub fn dispose_values(mut self) -> Self {
        if !self.settings.values.is_dispose() {
            self.settings.values = ValuePolicy::Dispose(None);
        }
        self
    }

    pub fn value_policy(mut self, policy: ValuePolicy<V>) -> Self {
        self.settings.values = policy;
        self
    }

    /// Allocate everything through `alloc` instead of the global allocator.
    pub fn allocator<B: Allocator + Clone>(self, alloc: B) -> TableBuilder<V, T, B> {
        TableBuilder {
            initial_size: self.initial_size,
            settings: self.settings,
            alloc,
        }
    }

    /// Unsynchronized table; the caller provides any locking.
    pub fn build_local<'k>(self) -> Result<LocalTable<'k, V, T, A>> {
        self.settings.thresholds.validate()?;
        LocalTable::from_parts(self.initial_size, self.settings, self.alloc)
    }

    pub fn build<'k>(self) -> Result<Table<'k, V, T, A>> {
        self.build_local().map(Table::from_local)
    }
}
