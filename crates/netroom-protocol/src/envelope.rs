//! Wire envelopes, the type-code table and batch framing.
//!
//! An envelope is `[type_code: u16 LE][payload]`. A batch is a run of
//! `[len: u32 LE][envelope]` frames, which is what one transport send
//! carries.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use crate::contract::NetSerialize;
use crate::resolver::{Binding, Resolvable, Resolver, take};
use crate::{NetReader, NetWriter, Registry, SerdeError, manual_binding};

// ---------------------------------------------------------------------------
// WireEnvelope
// ---------------------------------------------------------------------------

/// A type code and the encoded payload it identifies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WireEnvelope {
    pub type_code: u16,
    pub payload: Vec<u8>,
}

impl WireEnvelope {
    pub fn new(type_code: u16, payload: Vec<u8>) -> Self {
        Self { type_code, payload }
    }

    /// Size of the standalone encoding.
    pub fn encoded_len(&self) -> usize {
        2 + self.payload.len()
    }

    /// Appends the standalone encoding.
    pub fn write_to(&self, writer: &mut NetWriter) {
        writer.put_u16(self.type_code);
        writer.put_bytes(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = NetWriter::from_buffer(Vec::with_capacity(self.encoded_len()));
        self.write_to(&mut writer);
        writer.into_inner()
    }

    /// Parses a standalone encoding. Everything after the code is payload.
    pub fn parse(bytes: &[u8]) -> Result<Self, SerdeError> {
        let frame = EnvelopeRef::parse(bytes)?;
        Ok(frame.into_owned())
    }

    pub fn as_frame(&self) -> EnvelopeRef<'_> {
        EnvelopeRef {
            type_code: self.type_code,
            payload: &self.payload,
        }
    }
}

/// Nested inside another message, an envelope is a reference object whose
/// payload is length-prefixed like a byte array.
impl NetSerialize for WireEnvelope {
    fn net_write(&self, _: &Registry, writer: &mut NetWriter) -> Result<(), SerdeError> {
        writer.put_u16(self.type_code);
        writer.put_length(self.payload.len())?;
        writer.put_bytes(&self.payload);
        Ok(())
    }

    fn net_read(_: &Registry, reader: &mut NetReader<'_>) -> Result<Self, SerdeError> {
        let type_code = reader.take_u16()?;
        let len = reader
            .take_length()?
            .ok_or_else(|| SerdeError::mismatch::<Self>("null payload"))?;
        Ok(Self::new(type_code, reader.take_span(len)?.to_vec()))
    }
}

impl Resolvable for WireEnvelope {
    fn dynamic(_: &Registry) -> Binding {
        manual_binding::<Self>()
    }
}

/// A borrowed envelope, usually a frame inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeRef<'a> {
    pub type_code: u16,
    pub payload: &'a [u8],
}

impl<'a> EnvelopeRef<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, SerdeError> {
        let mut reader = NetReader::new(bytes);
        let type_code = reader.take_u16()?;
        Ok(Self {
            type_code,
            payload: reader.take_rest(),
        })
    }

    pub fn into_owned(self) -> WireEnvelope {
        WireEnvelope::new(self.type_code, self.payload.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Batch framing
// ---------------------------------------------------------------------------

/// Appends one `[len][envelope]` frame.
pub fn write_frame(writer: &mut NetWriter, envelope: &WireEnvelope) {
    writer.put_u32(envelope.encoded_len() as u32);
    envelope.write_to(writer);
}

/// Encodes a whole batch.
pub fn encode_batch<'e>(
    writer: &mut NetWriter,
    envelopes: impl IntoIterator<Item = &'e WireEnvelope>,
) {
    for envelope in envelopes {
        write_frame(writer, envelope);
    }
}

/// Iterates the frames of a batch.
///
/// A malformed frame yields one error and ends the iteration.
pub fn split_batch(bytes: &[u8]) -> Frames<'_> {
    Frames {
        reader: NetReader::new(bytes),
        failed: false,
    }
}

/// Iterator returned by [`split_batch`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    reader: NetReader<'a>,
    failed: bool,
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<EnvelopeRef<'a>, SerdeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_exhausted() {
            return None;
        }
        let frame = self
            .reader
            .take_u32()
            .and_then(|len| self.reader.take_span(len as usize))
            .and_then(EnvelopeRef::parse);
        self.failed = frame.is_err();
        Some(frame)
    }
}

// ---------------------------------------------------------------------------
// TypeCodeTable
// ---------------------------------------------------------------------------

type ResolveFn = fn(&Registry) -> Result<Arc<dyn Resolver>, SerdeError>;

#[derive(Clone, Copy)]
struct CodeEntry {
    type_id: TypeId,
    name: &'static str,
    resolve: ResolveFn,
}

/// Stable mapping between payload types and their 16-bit codes.
///
/// Both ends of a connection must use the same table.
#[derive(Clone, Default)]
pub struct TypeCodeTable {
    by_code: HashMap<u16, CodeEntry>,
    by_type: HashMap<TypeId, u16>,
}

impl TypeCodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `code` to `T`.
    ///
    /// # Errors
    /// [`SerdeError::DuplicateTypeCode`] if the code is taken or `T` already
    /// has a code.
    pub fn register<T: Resolvable>(&mut self, code: u16) -> Result<&mut Self, SerdeError> {
        let type_id = TypeId::of::<T>();
        if self.by_code.contains_key(&code) {
            return Err(SerdeError::DuplicateTypeCode(code));
        }
        if let Some(existing) = self.by_type.get(&type_id) {
            return Err(SerdeError::DuplicateTypeCode(*existing));
        }
        self.by_code.insert(
            code,
            CodeEntry {
                type_id,
                name: type_name::<T>(),
                resolve: Registry::resolve::<T>,
            },
        );
        self.by_type.insert(type_id, code);
        Ok(self)
    }

    /// The code assigned to `T`.
    pub fn code_of<T: Any>(&self) -> Result<u16, SerdeError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or(SerdeError::UnsupportedType(type_name::<T>()))
    }

    /// The type behind `code`.
    pub fn type_of(&self, code: u16) -> Result<TypeId, SerdeError> {
        self.entry(code).map(|e| e.type_id)
    }

    /// Type name behind `code`, for logs.
    pub fn name_of(&self, code: u16) -> Option<&'static str> {
        self.by_code.get(&code).map(|e| e.name)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    fn entry(&self, code: u16) -> Result<&CodeEntry, SerdeError> {
        self.by_code
            .get(&code)
            .ok_or(SerdeError::UnknownTypeCode(code))
    }
}

impl std::fmt::Debug for TypeCodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<_> = self.by_code.iter().map(|(c, e)| (*c, e.name)).collect();
        codes.sort_unstable_by_key(|(c, _)| *c);
        f.debug_struct("TypeCodeTable").field("codes", &codes).finish()
    }
}

// ---------------------------------------------------------------------------
// WireCodec
// ---------------------------------------------------------------------------

/// Encodes typed payloads into envelopes and back.
#[derive(Debug, Clone)]
pub struct WireCodec {
    registry: Arc<Registry>,
    codes: Arc<TypeCodeTable>,
}

impl WireCodec {
    pub fn new(registry: Arc<Registry>, codes: Arc<TypeCodeTable>) -> Self {
        Self { registry, codes }
    }

    /// The global registry with the room protocol's code table.
    pub fn standard() -> Self {
        Self::new(Registry::global(), Arc::new(TypeCodeTable::standard()))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn codes(&self) -> &Arc<TypeCodeTable> {
        &self.codes
    }

    pub fn encode<T: Resolvable>(&self, value: &T) -> Result<WireEnvelope, SerdeError> {
        let type_code = self.codes.code_of::<T>()?;
        let payload = self.registry.to_bytes(value)?;
        Ok(WireEnvelope { type_code, payload })
    }

    /// Decodes an envelope known to carry a `T`.
    pub fn decode<T: Resolvable>(&self, envelope: EnvelopeRef<'_>) -> Result<T, SerdeError> {
        let expected = self.codes.code_of::<T>()?;
        if envelope.type_code != expected {
            return Err(SerdeError::mismatch::<T>(format!(
                "type code {}",
                envelope.type_code
            )));
        }
        self.registry.from_bytes(envelope.payload)
    }

    /// Decodes an envelope into whatever type its code names.
    pub fn decode_any(&self, envelope: EnvelopeRef<'_>) -> Result<(TypeId, Box<dyn Any + Send>), SerdeError> {
        let entry = self.codes.entry(envelope.type_code)?;
        let resolver = (entry.resolve)(&self.registry)?;
        let value = resolver.read(&self.registry, &mut NetReader::new(envelope.payload))?;
        Ok((entry.type_id, value))
    }

    /// Decodes through [`decode_any`](Self::decode_any) and unboxes.
    pub fn decode_as<T: Any>(&self, envelope: EnvelopeRef<'_>) -> Result<T, SerdeError> {
        let (_, value) = self.decode_any(envelope)?;
        take(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standalone_envelope_layout() {
        let env = WireEnvelope::new(0x0102, vec![9, 8]);
        assert_eq!(env.to_bytes(), vec![0x02, 0x01, 9, 8]);
        assert_eq!(WireEnvelope::parse(&env.to_bytes()).unwrap(), env);
        assert!(WireEnvelope::parse(&[1]).is_err());
    }

    #[test]
    fn test_batch_frames_split_back() {
        let a = WireEnvelope::new(1, vec![]);
        let b = WireEnvelope::new(2, vec![7, 7, 7]);
        let mut w = NetWriter::new();
        encode_batch(&mut w, [&a, &b]);
        assert_eq!(&w.as_slice()[..6], &[2, 0, 0, 0, 1, 0]);

        let frames: Vec<_> = split_batch(w.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames, vec![a.as_frame(), b.as_frame()]);
    }

    #[test]
    fn test_truncated_batch_yields_one_error() {
        let mut w = NetWriter::new();
        write_frame(&mut w, &WireEnvelope::new(5, vec![1, 2, 3]));
        let bytes = &w.as_slice()[..w.len() - 1];
        let results: Vec<_> = split_batch(bytes).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(SerdeError::EndOfStream { .. })));
    }

    #[test]
    fn test_code_table_rejects_duplicates() {
        let mut table = TypeCodeTable::new();
        table.register::<u32>(1).unwrap();
        assert_eq!(
            table.register::<u64>(1).err(),
            Some(SerdeError::DuplicateTypeCode(1))
        );
        assert_eq!(
            table.register::<u32>(2).err(),
            Some(SerdeError::DuplicateTypeCode(1))
        );
        assert_eq!(table.code_of::<u32>().unwrap(), 1);
        assert_eq!(table.type_of(9), Err(SerdeError::UnknownTypeCode(9)));
    }

    #[test]
    fn test_codec_decode_checks_code() {
        let mut table = TypeCodeTable::new();
        table.register::<u32>(1).unwrap().register::<String>(2).unwrap();
        let codec = WireCodec::new(Arc::new(Registry::with_defaults()), Arc::new(table));

        let env = codec.encode(&String::from("x")).unwrap();
        assert_eq!(env.type_code, 2);
        assert_eq!(codec.decode::<String>(env.as_frame()).unwrap(), "x");
        assert!(codec.decode::<u32>(env.as_frame()).is_err());

        let (type_id, value) = codec.decode_any(env.as_frame()).unwrap();
        assert_eq!(type_id, TypeId::of::<String>());
        assert_eq!(take::<String>(value).unwrap(), "x");
    }

    #[test]
    fn test_nested_envelope_is_length_delimited() {
        let registry = Registry::with_defaults();
        let inner = vec![WireEnvelope::new(3, vec![1]), WireEnvelope::new(4, vec![])];
        let bytes = registry.to_bytes(&inner).unwrap();
        assert_eq!(
            bytes,
            vec![3, 0, 0, 3, 0, 2, 0, 1, 0, 4, 0, 1, 0]
        );
        assert_eq!(registry.from_bytes::<Vec<WireEnvelope>>(&bytes).unwrap(), inner);
    }
}
