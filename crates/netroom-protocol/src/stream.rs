//! Byte cursors used by every resolver.
//!
//! [`NetWriter`] appends little-endian primitives to a growable buffer.
//! [`NetReader`] walks a fixed window of bytes and refuses to read past it.

use crate::SerdeError;

/// Growth step for writer buffers.
pub const CHUNK_SIZE: usize = 1024;

/// Largest collection or string length the 16-bit prefix can carry.
pub const MAX_COLLECTION_LEN: usize = u16::MAX as usize - 1;

/// Append-only cursor over a growable byte buffer.
#[derive(Debug, Default)]
pub struct NetWriter {
    buf: Vec<u8>,
}

macro_rules! put_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Writes a little-endian `", stringify!($ty), "`.")]
            pub fn $name(&mut self, value: $ty) {
                self.put_bytes(&value.to_le_bytes());
            }
        )*
    };
}

impl NetWriter {
    /// Creates an empty writer with one chunk of capacity.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// Reuses an existing buffer. Its contents are discarded.
    pub fn from_buffer(mut buf: Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current capacity of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Discards written bytes, keeping the capacity.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Makes room for `additional` bytes.
    ///
    /// Capacity at least doubles and always lands on a multiple of
    /// [`CHUNK_SIZE`].
    fn grow_for(&mut self, additional: usize) {
        let needed = self.buf.len() + additional;
        if needed <= self.buf.capacity() {
            return;
        }
        let target = needed.max(self.buf.capacity() * 2);
        let target = target.div_ceil(CHUNK_SIZE) * CHUNK_SIZE;
        self.buf.reserve_exact(target - self.buf.len());
    }

    pub fn put_u8(&mut self, value: u8) {
        self.grow_for(1);
        self.buf.push(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    /// Writes raw bytes with no prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.grow_for(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    put_le! {
        put_i8: i8,
        put_u16: u16,
        put_i16: i16,
        put_u32: u32,
        put_i32: i32,
        put_u64: u64,
        put_i64: i64,
        put_u128: u128,
        put_i128: i128,
        put_f32: f32,
        put_f64: f64,
    }

    /// Writes a collection length as `count + 1`.
    ///
    /// # Errors
    /// [`SerdeError::EncodingOverflow`] when `count + 1` does not fit a `u16`.
    pub fn put_length(&mut self, count: usize) -> Result<(), SerdeError> {
        if count > MAX_COLLECTION_LEN {
            return Err(SerdeError::EncodingOverflow { len: count });
        }
        self.put_u16(count as u16 + 1);
        Ok(())
    }

    /// Writes the null collection marker (a zero length).
    pub fn put_null_length(&mut self) {
        self.put_u16(0);
    }

    /// Writes the one-byte nullable prefix: `0` present, `1` null.
    pub fn put_presence(&mut self, present: bool) {
        self.put_u8(if present { 0 } else { 1 });
    }
}

/// Bounded read cursor over a byte window.
#[derive(Debug, Clone)]
pub struct NetReader<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! take_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Reads a little-endian `", stringify!($ty), "`.")]
            pub fn $name(&mut self) -> Result<$ty, SerdeError> {
                Ok(<$ty>::from_le_bytes(self.take_array()?))
            }
        )*
    };
}

impl<'a> NetReader<'a> {
    /// Reads the whole slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Reads at most `capacity` bytes of `data`.
    pub fn windowed(data: &'a [u8], capacity: usize) -> Self {
        Self::new(&data[..capacity.min(data.len())])
    }

    /// Bytes left in the window.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<(), SerdeError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(SerdeError::EndOfStream { needed, remaining });
        }
        Ok(())
    }

    pub fn take_byte(&mut self) -> Result<u8, SerdeError> {
        self.ensure(1)?;
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Borrows the next `len` bytes.
    pub fn take_span(&mut self, len: usize) -> Result<&'a [u8], SerdeError> {
        self.ensure(len)?;
        let span = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(span)
    }

    /// Copies the next `N` bytes into an array.
    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], SerdeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take_span(N)?);
        Ok(out)
    }

    /// Everything left in the window.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    pub fn peek_byte(&self) -> Result<u8, SerdeError> {
        self.ensure(1)?;
        Ok(self.data[self.pos])
    }

    pub fn peek_u16(&self) -> Result<u16, SerdeError> {
        self.ensure(2)?;
        Ok(u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]))
    }

    pub fn take_u8(&mut self) -> Result<u8, SerdeError> {
        self.take_byte()
    }

    take_le! {
        take_i8: i8,
        take_u16: u16,
        take_i16: i16,
        take_u32: u32,
        take_i32: i32,
        take_u64: u64,
        take_i64: i64,
        take_u128: u128,
        take_i128: i128,
        take_f32: f32,
        take_f64: f64,
    }

    /// Reads a collection length. `None` is the null collection.
    pub fn take_length(&mut self) -> Result<Option<usize>, SerdeError> {
        match self.take_u16()? {
            0 => Ok(None),
            n => Ok(Some(n as usize - 1)),
        }
    }

    /// Reads the one-byte nullable prefix. Returns `true` when present.
    pub fn take_presence(&mut self) -> Result<bool, SerdeError> {
        match self.take_byte()? {
            0 => Ok(true),
            1 => Ok(false),
            other => Err(SerdeError::mismatch::<bool>(format!(
                "presence byte {other}"
            ))),
        }
    }
}
