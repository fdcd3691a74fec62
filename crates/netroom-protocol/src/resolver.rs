//! The resolver abstraction.
//!
//! A [`Resolver`] knows how to put one Rust type on the wire and take it
//! back off. Resolvers are type-erased (`&dyn Any` in, `Box<dyn Any>` out)
//! so the [`Registry`](crate::Registry) can keep every binding in a single
//! map keyed by [`TypeId`](std::any::TypeId). The typed helpers on the
//! registry do the downcasting.
//!
//! Types opt into derived resolvers through [`Resolvable`]. Its two hooks
//! correspond to the two derived tiers: `dynamic` for shapes the crate knows
//! at compile time (sequences, maps, tuples, `Option`, the three user
//! contracts) and `implicit` for anything that only offers an iterator
//! interface.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{NetReader, NetWriter, Registry, SerdeError};

/// Which resolution tier produced a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverKind {
    /// Bound to exactly one concrete type at registry build time.
    Explicit,
    /// Derived from the type's shape on first use.
    Dynamic,
    /// Derived from the iterator interface on first use.
    Implicit,
}

/// How a type expresses absence when wrapped in `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullability {
    /// No null form of its own. `Option` adds a one-byte prefix.
    Value,
    /// Length-prefixed. `Option` uses the zero length for `None`.
    Length,
    /// Always writes a one-byte prefix (`0`). `Option` writes `1` for `None`.
    Reference,
}

/// Encodes and decodes one type.
pub trait Resolver: Send + Sync + 'static {
    /// Name of the type this resolver handles, for diagnostics.
    fn type_name(&self) -> &'static str;

    fn kind(&self) -> ResolverKind;

    fn nullability(&self) -> Nullability {
        Nullability::Value
    }

    /// Writes `value`, which must be the resolver's type.
    fn write(
        &self,
        registry: &Registry,
        writer: &mut NetWriter,
        value: &dyn Any,
    ) -> Result<(), SerdeError>;

    /// Reads one value of the resolver's type.
    fn read(
        &self,
        registry: &Registry,
        reader: &mut NetReader<'_>,
    ) -> Result<Box<dyn Any + Send>, SerdeError>;
}

impl fmt::Debug for dyn Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("type", &self.type_name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Result of a derivation hook. `Ok(None)` means "not this tier".
pub type Binding = Result<Option<Arc<dyn Resolver>>, SerdeError>;

/// A type the registry can resolve.
///
/// Types bound in the explicit table implement this with an empty body.
/// Containers and user types override one of the hooks.
pub trait Resolvable: Any + Send + Sized {
    /// Builds a resolver from compile-time shape knowledge.
    fn dynamic(_registry: &Registry) -> Binding {
        Ok(None)
    }

    /// Builds a resolver over the type's iterator interface.
    fn implicit(_registry: &Registry) -> Binding {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Downcast helpers
// ---------------------------------------------------------------------------

/// Borrows a type-erased value as `T`.
pub fn downcast<T: Any>(value: &dyn Any) -> Result<&T, SerdeError> {
    value
        .downcast_ref::<T>()
        .ok_or_else(|| SerdeError::mismatch::<T>("value of another type"))
}

/// Unboxes a value produced by [`Resolver::read`].
pub fn take<T: Any>(value: Box<dyn Any + Send>) -> Result<T, SerdeError> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| SerdeError::mismatch::<T>("value of another type"))
}

// ---------------------------------------------------------------------------
// FnResolver
// ---------------------------------------------------------------------------

/// Write half of an [`FnResolver`].
pub type WriteFn<T> = fn(&Registry, &mut NetWriter, &T) -> Result<(), SerdeError>;
/// Read half of an [`FnResolver`].
pub type ReadFn<T> = fn(&Registry, &mut NetReader<'_>) -> Result<T, SerdeError>;

/// A resolver made of two plain functions.
///
/// This is how explicit bindings are expressed.
pub struct FnResolver<T> {
    kind: ResolverKind,
    nullability: Nullability,
    write: WriteFn<T>,
    read: ReadFn<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send> FnResolver<T> {
    pub fn new(write: WriteFn<T>, read: ReadFn<T>) -> Self {
        Self {
            kind: ResolverKind::Explicit,
            nullability: Nullability::Value,
            write,
            read,
            _marker: PhantomData,
        }
    }

    pub fn with_kind(mut self, kind: ResolverKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_nullability(mut self, nullability: Nullability) -> Self {
        self.nullability = nullability;
        self
    }
}

impl<T: Any + Send> Resolver for FnResolver<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn kind(&self) -> ResolverKind {
        self.kind
    }

    fn nullability(&self) -> Nullability {
        self.nullability
    }

    fn write(
        &self,
        registry: &Registry,
        writer: &mut NetWriter,
        value: &dyn Any,
    ) -> Result<(), SerdeError> {
        (self.write)(registry, writer, downcast::<T>(value)?)
    }

    fn read(
        &self,
        registry: &Registry,
        reader: &mut NetReader<'_>,
    ) -> Result<Box<dyn Any + Send>, SerdeError> {
        Ok(Box::new((self.read)(registry, reader)?))
    }
}
