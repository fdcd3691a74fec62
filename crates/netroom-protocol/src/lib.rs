//! Binary wire protocol for netroom.
//!
//! This crate turns typed values into bytes and back:
//!
//! - **Registry** ([`Registry`], [`Resolver`], [`Resolvable`]): maps each
//!   type to a resolver. Resolvers come from three tiers: explicit bindings
//!   for primitives, dynamic derivation for known shapes (`Vec`, `HashMap`,
//!   tuples, `Option`, user contracts), and an implicit fallback over the
//!   iterator interface.
//! - **Streams** ([`NetWriter`], [`NetReader`], [`StreamPool`]): bounded
//!   cursors and a buffer pool shared by every room.
//! - **Envelopes** ([`WireEnvelope`], [`TypeCodeTable`], [`WireCodec`]):
//!   a type code plus payload, so many message types share one channel.
//! - **Messages** ([`messages`]): the room protocol itself.
//!
//! # Wire rules
//!
//! All integers are little-endian. Collections and strings are prefixed
//! with a `u16` holding `count + 1`; `0` is the null collection. Reference
//! objects ([`NetFields`] types) carry a one-byte prefix, `0` present and
//! `1` null. `Option` of a value type adds that same prefix.
//!
//! ```text
//! transport (bytes) → protocol (envelopes) → room (state)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod contract;
mod envelope;
mod error;
pub mod messages;
mod pool;
mod registry;
mod resolver;
pub mod resolvers;
mod stream;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use contract::{
    EnumRepr, FieldReader, FieldWriter, NetEnum, NetFields, NetSerialize, enum_binding,
    fields_binding, manual_binding,
};
pub use envelope::{
    EnvelopeRef, Frames, TypeCodeTable, WireCodec, WireEnvelope, encode_batch, split_batch,
    write_frame,
};
pub use error::SerdeError;
pub use pool::{PoolConfig, PoolStats, ReaderLease, StreamPool, WriterLease};
pub use registry::{Matcher, Registry, RegistryBuilder};
pub use resolver::{
    Binding, FnResolver, Nullability, ReadFn, Resolvable, Resolver, ResolverKind, WriteFn,
    downcast, take,
};
pub use resolvers::implicit::{implicit_map, implicit_seq};
pub use stream::{CHUNK_SIZE, MAX_COLLECTION_LEN, NetReader, NetWriter};

pub use netroom_transport::ClientId;
