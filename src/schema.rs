//! Schema: declarative description of composite keys.
//!
//! A `Schema<T>` is an ordered list of fields. Each field projects part of a
//! `T` through an accessor: raw primitive bytes, a fixed-length run of nested
//! items, a run whose length is read from a sibling field, or a text field.
//! One generic walker derives both a structural hash and a total order from
//! that list, so composite keys never need a hand-written hash/compare pair.
//!
//! Ordering rules
//! - Fields are compared in declaration order; the first non-equal field
//!   decides. Declaration order is therefore comparison priority.
//! - Absent (null) nested runs and text order before present ones; two
//!   absent values are equal.
//! - Variable-length runs of different runtime length order by length
//!   without inspecting their elements.
//!
//! Hashing accumulates over every described byte of the tree and finalizes
//! once at the top level.
//!
//! An accessor that yields fewer items than its field declares is a broken
//! schema, not a data condition: the walker panics naming the field.

use crate::hash::OneAtATime;
use core::cmp::Ordering;
use core::fmt;
use core::hash::Hasher;
use core::marker::PhantomData;

/// Values whose raw bytes form a primitive field.
pub trait Primitive {
    type Bytes: AsRef<[u8]>;

    fn to_bytes(&self) -> Self::Bytes;
}

macro_rules! native_endian_primitive {
    ($($t:ty),* $(,)?) => {
        $(
            impl Primitive for $t {
                type Bytes = [u8; core::mem::size_of::<$t>()];

                #[inline]
                fn to_bytes(&self) -> Self::Bytes {
                    self.to_ne_bytes()
                }
            }
        )*
    };
}

native_endian_primitive!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl Primitive for bool {
    type Bytes = [u8; 1];

    fn to_bytes(&self) -> Self::Bytes {
        [u8::from(*self)]
    }
}

impl Primitive for char {
    type Bytes = [u8; 4];

    fn to_bytes(&self) -> Self::Bytes {
        u32::from(*self).to_ne_bytes()
    }
}

impl<const N: usize> Primitive for [u8; N] {
    type Bytes = [u8; N];

    fn to_bytes(&self) -> Self::Bytes {
        *self
    }
}

/// Shape of a schema field, for introspection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Primitive,
    /// Nested run with a length fixed by the schema.
    Pointer { len: usize },
    /// Nested run whose length is read from the key at runtime.
    Array,
    Text,
}

trait PrimitiveBytes<T: ?Sized>: Send + Sync {
    fn with_bytes(&self, key: &T, sink: &mut dyn FnMut(&[u8]));
}

struct Prim<F, P> {
    get: F,
    _p: PhantomData<fn() -> P>,
}

impl<T: ?Sized, F, P> PrimitiveBytes<T> for Prim<F, P>
where
    F: Fn(&T) -> P + Send + Sync,
    P: Primitive,
{
    #[inline]
    fn with_bytes(&self, key: &T, sink: &mut dyn FnMut(&[u8])) {
        sink((self.get)(key).to_bytes().as_ref())
    }
}

trait Items<T: ?Sized>: Send + Sync {
    fn hash_into(&self, owner: &T, len: usize, field: &'static str, state: &mut OneAtATime);
    fn compare(&self, a: &T, b: &T, len: usize, field: &'static str) -> Ordering;
}

struct Nested<F, U> {
    items: F,
    schema: Schema<U>,
}

fn declared<'a, U>(items: &'a [U], len: usize, field: &'static str) -> &'a [U] {
    if items.len() < len {
        tracing::error!(field, declared = len, actual = items.len(), "schema accessor too short");
        panic!(
            "schema field `{}` declares {} items but its accessor yielded {}",
            field,
            len,
            items.len()
        );
    }
    &items[..len]
}

impl<T: ?Sized, F, U> Items<T> for Nested<F, U>
where
    F: for<'a> Fn(&'a T) -> Option<&'a [U]> + Send + Sync,
{
    fn hash_into(&self, owner: &T, len: usize, field: &'static str, state: &mut OneAtATime) {
        // A null run contributes nothing.
        if let Some(items) = (self.items)(owner) {
            for item in declared(items, len, field) {
                self.schema.hash_into(item, state);
            }
        }
    }

    fn compare(&self, a: &T, b: &T, len: usize, field: &'static str) -> Ordering {
        if len == 0 {
            return Ordering::Equal;
        }
        match ((self.items)(a), (self.items)(b)) {
            (Some(xa), Some(xb)) => {
                let (xa, xb) = (declared(xa, len, field), declared(xb, len, field));
                xa.iter()
                    .zip(xb)
                    .map(|(ia, ib)| self.schema.compare(ia, ib))
                    .find(|ord| ord.is_ne())
                    .unwrap_or(Ordering::Equal)
            }
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        }
    }
}

type TextFn<T> = Box<dyn for<'a> Fn(&'a T) -> Option<&'a [u8]> + Send + Sync>;
type LenFn<T> = Box<dyn Fn(&T) -> usize + Send + Sync>;

enum Kind<T: ?Sized> {
    Primitive(Box<dyn PrimitiveBytes<T>>),
    Pointer { len: usize, items: Box<dyn Items<T>> },
    Array { len: LenFn<T>, items: Box<dyn Items<T>> },
    Text(TextFn<T>),
}

struct Field<T: ?Sized> {
    name: &'static str,
    kind: Kind<T>,
}

impl<T: ?Sized> Field<T> {
    fn shape(&self) -> FieldKind {
        match &self.kind {
            Kind::Primitive(_) => FieldKind::Primitive,
            Kind::Pointer { len, .. } => FieldKind::Pointer { len: *len },
            Kind::Array { .. } => FieldKind::Array,
            Kind::Text(_) => FieldKind::Text,
        }
    }
}

/// Ordered field list describing how to hash and compare a `T`.
pub struct Schema<T: ?Sized> {
    fields: Vec<Field<T>>,
}

impl<T: ?Sized> Default for Schema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields()).finish()
    }
}

impl<T: ?Sized> Schema<T> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    fn push(mut self, name: &'static str, kind: Kind<T>) -> Self {
        self.fields.push(Field { name, kind });
        self
    }

    /// Raw bytes of a primitive projected out of the key.
    pub fn primitive<P, F>(self, name: &'static str, get: F) -> Self
    where
        P: Primitive + 'static,
        F: Fn(&T) -> P + Send + Sync + 'static,
    {
        let prim = Prim {
            get,
            _p: PhantomData,
        };
        self.push(name, Kind::Primitive(Box::new(prim)))
    }

    /// `len` nested items, each described by `schema`. `None` is a null run.
    pub fn pointer<U, F>(self, name: &'static str, len: usize, items: F, schema: Schema<U>) -> Self
    where
        U: 'static,
        F: for<'a> Fn(&'a T) -> Option<&'a [U]> + Send + Sync + 'static,
    {
        let items = Box::new(Nested { items, schema });
        self.push(name, Kind::Pointer { len, items })
    }

    /// Nested items whose count is read from the key by `len`.
    pub fn array<U, L, F>(self, name: &'static str, len: L, items: F, schema: Schema<U>) -> Self
    where
        U: 'static,
        L: Fn(&T) -> usize + Send + Sync + 'static,
        F: for<'a> Fn(&'a T) -> Option<&'a [U]> + Send + Sync + 'static,
    {
        let items = Box::new(Nested { items, schema });
        self.push(
            name,
            Kind::Array {
                len: Box::new(len),
                items,
            },
        )
    }

    /// Text bytes, without terminator. `None` is a null string.
    pub fn text<F>(self, name: &'static str, get: F) -> Self
    where
        F: for<'a> Fn(&'a T) -> Option<&'a [u8]> + Send + Sync + 'static,
    {
        self.push(name, Kind::Text(Box::new(get)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Stop describing the key after the first `len` fields.
    pub fn truncate(&mut self, len: usize) {
        self.fields.truncate(len);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, FieldKind)> + '_ {
        self.fields.iter().map(|f| (f.name, f.shape()))
    }

    /// Structural hash of `key`.
    pub fn hash(&self, key: &T) -> u32 {
        let mut state = OneAtATime::new();
        self.hash_into(key, &mut state);
        state.finish32()
    }

    pub(crate) fn hash_into(&self, key: &T, state: &mut OneAtATime) {
        for field in &self.fields {
            match &field.kind {
                Kind::Primitive(p) => p.with_bytes(key, &mut |bytes| state.write(bytes)),
                Kind::Pointer { len, items } => items.hash_into(key, *len, field.name, state),
                Kind::Array { len, items } => items.hash_into(key, len(key), field.name, state),
                Kind::Text(get) => {
                    if let Some(text) = get(key) {
                        state.write(text);
                    }
                }
            }
        }
    }

    /// Structural order of two keys; `Equal` iff every described field matches.
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        for field in &self.fields {
            let ord = match &field.kind {
                Kind::Primitive(p) => {
                    let mut ord = Ordering::Equal;
                    p.with_bytes(a, &mut |xa| p.with_bytes(b, &mut |xb| ord = xa.cmp(xb)));
                    ord
                }
                Kind::Pointer { len, items } => items.compare(a, b, *len, field.name),
                Kind::Array { len, items } => {
                    let (la, lb) = (len(a), len(b));
                    if la != lb {
                        la.cmp(&lb)
                    } else {
                        items.compare(a, b, la, field.name)
                    }
                }
                Kind::Text(get) => get(a).cmp(&get(b)),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        Ordering::Equal
    }
}
