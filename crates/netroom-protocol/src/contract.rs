//! Contracts user types implement to become serializable.
//!
//! - [`NetFields`]: list the fields to send, in order. The registry encodes
//!   each field with its own resolver.
//! - [`NetSerialize`]: write and read the bytes by hand.
//! - [`NetEnum`]: a fieldless enum sent as its integer representation.
//!
//! Implementing a contract does not bind the type by itself. The type's
//! [`Resolvable::dynamic`] hook must return the matching binding
//! ([`fields_binding`], [`manual_binding`] or [`enum_binding`]). The
//! [`net_struct!`](crate::net_struct) and [`net_enum!`](crate::net_enum)
//! macros do both steps.

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use crate::resolver::{Binding, Nullability, Resolvable};
use crate::resolvers::{EnumResolver, FieldsResolver, ManualResolver};
use crate::{NetReader, NetWriter, Registry, SerdeError};

// ---------------------------------------------------------------------------
// Select-fields contract
// ---------------------------------------------------------------------------

/// A type that serializes as an ordered list of fields.
///
/// The value is a reference object on the wire: it is always preceded by
/// a one-byte prefix.
pub trait NetFields: Resolvable {
    fn write_fields(&self, out: &mut FieldWriter<'_>) -> Result<(), SerdeError>;

    fn read_fields(input: &mut FieldReader<'_, '_>) -> Result<Self, SerdeError>;
}

/// Sink handed to [`NetFields::write_fields`].
pub struct FieldWriter<'a> {
    registry: &'a Registry,
    writer: &'a mut NetWriter,
}

impl<'a> FieldWriter<'a> {
    pub(crate) fn new(registry: &'a Registry, writer: &'a mut NetWriter) -> Self {
        Self { registry, writer }
    }

    /// Writes the next field.
    pub fn field<T: Resolvable>(&mut self, value: &T) -> Result<(), SerdeError> {
        self.registry.serialize(self.writer, value)
    }
}

/// Source handed to [`NetFields::read_fields`].
pub struct FieldReader<'a, 'b> {
    registry: &'a Registry,
    reader: &'a mut NetReader<'b>,
}

impl<'a, 'b> FieldReader<'a, 'b> {
    pub(crate) fn new(registry: &'a Registry, reader: &'a mut NetReader<'b>) -> Self {
        Self { registry, reader }
    }

    /// Reads the next field.
    pub fn field<T: Resolvable>(&mut self) -> Result<T, SerdeError> {
        self.registry.deserialize(self.reader)
    }
}

/// Binding for a [`NetFields`] type.
pub fn fields_binding<T: NetFields>() -> Binding {
    Ok(Some(Arc::new(FieldsResolver::<T>::new())))
}

// ---------------------------------------------------------------------------
// Manual contract
// ---------------------------------------------------------------------------

/// A type that writes its own bytes.
pub trait NetSerialize: Resolvable {
    /// How the type expresses absence inside `Option`.
    ///
    /// With the default, [`Nullability::Reference`], the registry writes the
    /// one-byte prefix before [`net_write`](Self::net_write) runs.
    const NULLABILITY: Nullability = Nullability::Reference;

    fn net_write(&self, registry: &Registry, writer: &mut NetWriter) -> Result<(), SerdeError>;

    fn net_read(registry: &Registry, reader: &mut NetReader<'_>) -> Result<Self, SerdeError>;
}

/// Binding for a [`NetSerialize`] type.
pub fn manual_binding<T: NetSerialize>() -> Binding {
    Ok(Some(Arc::new(ManualResolver::<T>::new())))
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Integer types an enum can be represented as.
pub trait EnumRepr: Copy + Eq + Hash + Display + Send + Sync + 'static {
    fn put(self, writer: &mut NetWriter);

    fn take(reader: &mut NetReader<'_>) -> Result<Self, SerdeError>;
}

macro_rules! enum_repr {
    ($($ty:ty => $put:ident, $take:ident;)*) => {
        $(
            impl EnumRepr for $ty {
                fn put(self, writer: &mut NetWriter) {
                    writer.$put(self);
                }

                fn take(reader: &mut NetReader<'_>) -> Result<Self, SerdeError> {
                    reader.$take()
                }
            }
        )*
    };
}

enum_repr! {
    u8 => put_u8, take_u8;
    i8 => put_i8, take_i8;
    u16 => put_u16, take_u16;
    i16 => put_i16, take_i16;
    u32 => put_u32, take_u32;
    i32 => put_i32, take_i32;
    u64 => put_u64, take_u64;
    i64 => put_i64, take_i64;
}

/// A fieldless enum carried as its declared integer representation.
pub trait NetEnum: Copy + Resolvable + Sync {
    type Repr: EnumRepr;

    /// Every variant, used to build the decode table.
    const VARIANTS: &'static [Self];

    fn to_repr(self) -> Self::Repr;
}

/// Binding for a [`NetEnum`] type.
pub fn enum_binding<T: NetEnum>() -> Binding {
    Ok(Some(Arc::new(EnumResolver::<T>::new())))
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// Declares a struct serialized field by field, in declaration order.
///
/// ```
/// netroom_protocol::net_struct! {
///     pub struct Score {
///         pub name: String,
///         pub points: u32,
///     }
/// }
///
/// let registry = netroom_protocol::Registry::with_defaults();
/// let bytes = registry.to_bytes(&Score { name: "a".into(), points: 3 }).unwrap();
/// assert_eq!(bytes, vec![0, 2, 0, b'a', 3, 0, 0, 0]);
/// ```
#[macro_export]
macro_rules! net_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field: $ty ),*
        }

        impl $crate::NetFields for $name {
            #[allow(unused_variables)]
            fn write_fields(
                &self,
                out: &mut $crate::FieldWriter<'_>,
            ) -> ::std::result::Result<(), $crate::SerdeError> {
                $( out.field(&self.$field)?; )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn read_fields(
                input: &mut $crate::FieldReader<'_, '_>,
            ) -> ::std::result::Result<Self, $crate::SerdeError> {
                Ok(Self { $( $field: input.field()? ),* })
            }
        }

        impl $crate::Resolvable for $name {
            fn dynamic(_: &$crate::Registry) -> $crate::Binding {
                $crate::fields_binding::<Self>()
            }
        }
    };
}

/// Declares a fieldless enum carried as its integer representation.
///
/// ```
/// netroom_protocol::net_enum! {
///     pub enum Team: u8 {
///         Red = 1,
///         Blue = 2,
///     }
/// }
///
/// let registry = netroom_protocol::Registry::with_defaults();
/// assert_eq!(registry.to_bytes(&Team::Blue).unwrap(), vec![2]);
/// ```
#[macro_export]
macro_rules! net_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $crate::NetEnum for $name {
            type Repr = $repr;
            const VARIANTS: &'static [Self] = &[$( Self::$variant ),+];

            fn to_repr(self) -> $repr {
                self as $repr
            }
        }

        impl $crate::Resolvable for $name {
            fn dynamic(_: &$crate::Registry) -> $crate::Binding {
                $crate::enum_binding::<Self>()
            }
        }
    };
}
