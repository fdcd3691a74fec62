//! Dynamic tier: resolvers derived from a type's compile-time shape.
//!
//! Each one is built the first time its concrete type is resolved. Building
//! a container resolver resolves the element resolvers once and keeps them,
//! so encoding a `Vec<T>` never goes back to the registry per element.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::contract::{FieldReader, FieldWriter, NetEnum, NetFields, NetSerialize};
use crate::contract::EnumRepr;
use crate::resolver::{
    Binding, Nullability, Resolvable, Resolver, ResolverKind, downcast, take,
};
use crate::{NetReader, NetWriter, Registry, SerdeError};

type Erased = Box<dyn Any + Send>;

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// Length-prefixed sequence of `T`, collected into `C`.
pub struct SeqResolver<C, T> {
    item: Arc<dyn Resolver>,
    kind: ResolverKind,
    count: fn(&C) -> usize,
    _marker: PhantomData<fn() -> (C, T)>,
}

impl<C, T> SeqResolver<C, T>
where
    C: FromIterator<T> + Any + Send,
    for<'a> &'a C: IntoIterator<Item = &'a T>,
    T: Resolvable,
{
    pub(crate) fn new(item: Arc<dyn Resolver>, kind: ResolverKind, count: fn(&C) -> usize) -> Self {
        Self {
            item,
            kind,
            count,
            _marker: PhantomData,
        }
    }
}

impl<C, T> Resolver for SeqResolver<C, T>
where
    C: FromIterator<T> + Any + Send,
    for<'a> &'a C: IntoIterator<Item = &'a T>,
    T: Resolvable,
{
    fn type_name(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    fn kind(&self) -> ResolverKind {
        self.kind
    }

    fn nullability(&self) -> Nullability {
        Nullability::Length
    }

    fn write(&self, registry: &Registry, writer: &mut NetWriter, value: &dyn Any) -> Result<(), SerdeError> {
        let items = downcast::<C>(value)?;
        writer.put_length((self.count)(items))?;
        for item in items {
            self.item.write(registry, writer, item)?;
        }
        Ok(())
    }

    fn read(&self, registry: &Registry, reader: &mut NetReader<'_>) -> Result<Erased, SerdeError> {
        let len = reader
            .take_length()?
            .ok_or_else(|| SerdeError::mismatch::<C>("null"))?;
        let items = (0..len)
            .map(|_| take::<T>(self.item.read(registry, reader)?))
            .collect::<Result<C, _>>()?;
        Ok(Box::new(items))
    }
}

/// Length-prefixed run of key/value pairs, collected into `C`.
pub struct MapResolver<C, K, V> {
    key: Arc<dyn Resolver>,
    value: Arc<dyn Resolver>,
    kind: ResolverKind,
    count: fn(&C) -> usize,
    _marker: PhantomData<fn() -> (C, K, V)>,
}

impl<C, K, V> MapResolver<C, K, V>
where
    C: FromIterator<(K, V)> + Any + Send,
    for<'a> &'a C: IntoIterator<Item = (&'a K, &'a V)>,
    K: Resolvable,
    V: Resolvable,
{
    pub(crate) fn new(registry: &Registry, kind: ResolverKind, count: fn(&C) -> usize) -> Result<Self, SerdeError> {
        Ok(Self {
            key: registry.resolve::<K>()?,
            value: registry.resolve::<V>()?,
            kind,
            count,
            _marker: PhantomData,
        })
    }
}

impl<C, K, V> Resolver for MapResolver<C, K, V>
where
    C: FromIterator<(K, V)> + Any + Send,
    for<'a> &'a C: IntoIterator<Item = (&'a K, &'a V)>,
    K: Resolvable,
    V: Resolvable,
{
    fn type_name(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    fn kind(&self) -> ResolverKind {
        self.kind
    }

    fn nullability(&self) -> Nullability {
        Nullability::Length
    }

    fn write(&self, registry: &Registry, writer: &mut NetWriter, value: &dyn Any) -> Result<(), SerdeError> {
        let map = downcast::<C>(value)?;
        writer.put_length((self.count)(map))?;
        for (k, v) in map {
            self.key.write(registry, writer, k)?;
            self.value.write(registry, writer, v)?;
        }
        Ok(())
    }

    fn read(&self, registry: &Registry, reader: &mut NetReader<'_>) -> Result<Erased, SerdeError> {
        let len = reader
            .take_length()?
            .ok_or_else(|| SerdeError::mismatch::<C>("null"))?;
        let map = (0..len)
            .map(|_| -> Result<(K, V), SerdeError> {
                let k = take::<K>(self.key.read(registry, reader)?)?;
                let v = take::<V>(self.value.read(registry, reader)?)?;
                Ok((k, v))
            })
            .collect::<Result<C, SerdeError>>()?;
        Ok(Box::new(map))
    }
}

impl<T: Resolvable> Resolvable for Vec<T> {
    fn dynamic(registry: &Registry) -> Binding {
        let item = registry.resolve::<T>()?;
        Ok(Some(Arc::new(SeqResolver::<Self, T>::new(item, ResolverKind::Dynamic, |c| c.len()))))
    }
}

impl<T: Resolvable> Resolvable for Box<[T]> {
    fn dynamic(registry: &Registry) -> Binding {
        let item = registry.resolve::<T>()?;
        Ok(Some(Arc::new(SeqResolver::<Self, T>::new(item, ResolverKind::Dynamic, |c| c.len()))))
    }
}

impl<T: Resolvable> Resolvable for VecDeque<T> {
    fn dynamic(registry: &Registry) -> Binding {
        let item = registry.resolve::<T>()?;
        Ok(Some(Arc::new(SeqResolver::<Self, T>::new(item, ResolverKind::Dynamic, |c| c.len()))))
    }
}

impl<T: Resolvable + Eq + Hash> Resolvable for HashSet<T> {
    fn dynamic(registry: &Registry) -> Binding {
        let item = registry.resolve::<T>()?;
        Ok(Some(Arc::new(SeqResolver::<Self, T>::new(item, ResolverKind::Dynamic, |c| c.len()))))
    }
}

impl<K: Resolvable + Eq + Hash, V: Resolvable> Resolvable for HashMap<K, V> {
    fn dynamic(registry: &Registry) -> Binding {
        let resolver = MapResolver::<Self, K, V>::new(registry, ResolverKind::Dynamic, |m| m.len())?;
        Ok(Some(Arc::new(resolver)))
    }
}

// ---------------------------------------------------------------------------
// Option
// ---------------------------------------------------------------------------

/// `Option<T>`, using whatever null form `T` has.
pub struct OptionResolver<T> {
    inner: Arc<dyn Resolver>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resolvable> Resolver for OptionResolver<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Option<T>>()
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::Dynamic
    }

    fn write(&self, registry: &Registry, writer: &mut NetWriter, value: &dyn Any) -> Result<(), SerdeError> {
        let value = downcast::<Option<T>>(value)?;
        match (value, self.inner.nullability()) {
            (Some(v), Nullability::Value) => {
                writer.put_presence(true);
                self.inner.write(registry, writer, v)
            }
            // Length and reference forms carry their own "present" marker.
            (Some(v), _) => self.inner.write(registry, writer, v),
            (None, Nullability::Length) => {
                writer.put_null_length();
                Ok(())
            }
            (None, _) => {
                writer.put_presence(false);
                Ok(())
            }
        }
    }

    fn read(&self, registry: &Registry, reader: &mut NetReader<'_>) -> Result<Erased, SerdeError> {
        let present = match self.inner.nullability() {
            Nullability::Value => reader.take_presence()?,
            Nullability::Length => {
                if reader.peek_u16()? == 0 {
                    reader.take_u16()?;
                    false
                } else {
                    true
                }
            }
            Nullability::Reference => {
                if reader.peek_byte()? == 1 {
                    reader.take_byte()?;
                    false
                } else {
                    true
                }
            }
        };
        let value: Option<T> = if present {
            Some(take::<T>(self.inner.read(registry, reader)?)?)
        } else {
            None
        };
        Ok(Box::new(value))
    }
}

impl<T: Resolvable> Resolvable for Option<T> {
    fn dynamic(registry: &Registry) -> Binding {
        Ok(Some(Arc::new(OptionResolver::<T> {
            inner: registry.resolve::<T>()?,
            _marker: PhantomData,
        })))
    }
}

// ---------------------------------------------------------------------------
// Tuples
// ---------------------------------------------------------------------------

type Parts = [Arc<dyn Resolver>];

/// A tuple written element after element with no prefix.
pub struct TupleResolver<T> {
    parts: Vec<Arc<dyn Resolver>>,
    write: fn(&Parts, &Registry, &mut NetWriter, &T) -> Result<(), SerdeError>,
    read: fn(&Parts, &Registry, &mut NetReader<'_>) -> Result<T, SerdeError>,
}

impl<T: Resolvable> Resolver for TupleResolver<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::Dynamic
    }

    fn write(&self, registry: &Registry, writer: &mut NetWriter, value: &dyn Any) -> Result<(), SerdeError> {
        (self.write)(&self.parts, registry, writer, downcast::<T>(value)?)
    }

    fn read(&self, registry: &Registry, reader: &mut NetReader<'_>) -> Result<Erased, SerdeError> {
        Ok(Box::new((self.read)(&self.parts, registry, reader)?))
    }
}

macro_rules! tuple_resolvable {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: Resolvable),+> Resolvable for ($($name,)+) {
            fn dynamic(registry: &Registry) -> Binding {
                let parts = vec![$( registry.resolve::<$name>()? ),+];
                Ok(Some(Arc::new(TupleResolver::<Self> {
                    parts,
                    write: |parts, registry, writer, value| {
                        $( parts[$idx].write(registry, writer, &value.$idx)?; )+
                        Ok(())
                    },
                    read: |parts, registry, reader| {
                        Ok(($( take::<$name>(parts[$idx].read(registry, reader)?)?, )+))
                    },
                })))
            }
        }
    };
}

tuple_resolvable!(A.0, B.1);
tuple_resolvable!(A.0, B.1, C.2);
tuple_resolvable!(A.0, B.1, C.2, D.3);
tuple_resolvable!(A.0, B.1, C.2, D.3, E.4);
tuple_resolvable!(A.0, B.1, C.2, D.3, E.4, F.5);
tuple_resolvable!(A.0, B.1, C.2, D.3, E.4, F.5, G.6);
tuple_resolvable!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);

// ---------------------------------------------------------------------------
// User contracts
// ---------------------------------------------------------------------------

/// Resolver for [`NetFields`] types.
pub struct FieldsResolver<T>(PhantomData<fn() -> T>);

impl<T: NetFields> FieldsResolver<T> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: NetFields> Resolver for FieldsResolver<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::Dynamic
    }

    fn nullability(&self) -> Nullability {
        Nullability::Reference
    }

    fn write(&self, registry: &Registry, writer: &mut NetWriter, value: &dyn Any) -> Result<(), SerdeError> {
        let value = downcast::<T>(value)?;
        writer.put_presence(true);
        value.write_fields(&mut FieldWriter::new(registry, writer))
    }

    fn read(&self, registry: &Registry, reader: &mut NetReader<'_>) -> Result<Erased, SerdeError> {
        if !reader.take_presence()? {
            return Err(SerdeError::mismatch::<T>("null"));
        }
        let value = T::read_fields(&mut FieldReader::new(registry, reader))?;
        Ok(Box::new(value))
    }
}

/// Resolver for [`NetSerialize`] types.
pub struct ManualResolver<T>(PhantomData<fn() -> T>);

impl<T: NetSerialize> ManualResolver<T> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: NetSerialize> Resolver for ManualResolver<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::Dynamic
    }

    fn nullability(&self) -> Nullability {
        T::NULLABILITY
    }

    fn write(&self, registry: &Registry, writer: &mut NetWriter, value: &dyn Any) -> Result<(), SerdeError> {
        let value = downcast::<T>(value)?;
        if T::NULLABILITY == Nullability::Reference {
            writer.put_presence(true);
        }
        value.net_write(registry, writer)
    }

    fn read(&self, registry: &Registry, reader: &mut NetReader<'_>) -> Result<Erased, SerdeError> {
        if T::NULLABILITY == Nullability::Reference && !reader.take_presence()? {
            return Err(SerdeError::mismatch::<T>("null"));
        }
        Ok(Box::new(T::net_read(registry, reader)?))
    }
}

/// Resolver for [`NetEnum`] types.
///
/// The discriminant-to-variant table is built once, when the resolver is
/// derived.
pub struct EnumResolver<T: NetEnum> {
    variants: HashMap<T::Repr, T>,
}

impl<T: NetEnum> EnumResolver<T> {
    pub(crate) fn new() -> Self {
        let variants = T::VARIANTS.iter().map(|v| (v.to_repr(), *v)).collect();
        Self { variants }
    }
}

impl<T: NetEnum> Resolver for EnumResolver<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::Dynamic
    }

    fn write(&self, _: &Registry, writer: &mut NetWriter, value: &dyn Any) -> Result<(), SerdeError> {
        downcast::<T>(value)?.to_repr().put(writer);
        Ok(())
    }

    fn read(&self, _: &Registry, reader: &mut NetReader<'_>) -> Result<Erased, SerdeError> {
        let raw = <T::Repr as EnumRepr>::take(reader)?;
        let value = self
            .variants
            .get(&raw)
            .copied()
            .ok_or_else(|| SerdeError::mismatch::<T>(format!("discriminant {raw}")))?;
        Ok(Box::new(value))
    }
}
