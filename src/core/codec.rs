//! Binary Codec
//!
//! Little-endian primitive readers and writers over in-memory buffers.
//!
//! The writer supports forward references through [`DeferredPointer`]: a
//! 2-byte placeholder is allocated at the current position and patched in
//! place once the target section has been written. All pointers are 16-bit
//! offsets relative to the start of the buffer, which is what peripheral
//! firmware walks without a general-purpose parser.

use thiserror::Error;

/// Maximum byte length of a length-prefixed string.
pub const MAX_PREFIXED_STR_LEN: usize = u8::MAX as usize;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Read past the end of the buffer.
    #[error("out of data: needed {needed} bytes at offset {offset}, {available} available")]
    OutOfData {
        /// Read position.
        offset: usize,
        /// Bytes requested.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// String does not fit a 1-byte length prefix.
    #[error("string of {0} bytes exceeds the 255 byte prefix limit")]
    StringTooLong(usize),

    /// String bytes are not valid UTF-8.
    #[error("string at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    /// Null-terminated string without a terminator.
    #[error("unterminated string at offset {0}")]
    Unterminated(usize),

    /// Count does not fit in 8 bits.
    #[error("value {0} does not fit in 8 bits")]
    Overflow8(usize),

    /// Offset or count does not fit in 16 bits.
    #[error("value {0} does not fit in 16 bits")]
    Overflow16(usize),

    /// Seek target outside the buffer.
    #[error("seek to {target} outside buffer of {len} bytes")]
    SeekOutOfRange {
        /// Requested position.
        target: usize,
        /// Buffer length.
        len: usize,
    },
}

// =============================================================================
// READER
// =============================================================================

/// Cursor over a borrowed byte buffer.
#[derive(Debug, Clone)]
pub struct DataInput<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataInput<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Move the cursor to an absolute position.
    pub fn seek(&mut self, target: usize) -> Result<(), CodecError> {
        if target > self.data.len() {
            return Err(CodecError::SeekOutOfRange {
                target,
                len: self.data.len(),
            });
        }
        self.pos = target;
        Ok(())
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::OutOfData {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.read_bytes(N)?);
        Ok(arr)
    }

    /// Read an unsigned byte.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a little-endian u16.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian u32.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian i16.
    #[inline]
    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian i32.
    #[inline]
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    /// Read a raw little-endian f32.
    #[inline]
    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Read a byte as a boolean (non-zero is true).
    #[inline]
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a string with a 1-byte length prefix.
    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let len = self.read_u8()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8(start))
    }

    /// Read a null-terminated string. The terminator is consumed.
    pub fn read_cstr(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::Unterminated(start))?;
        let text = std::str::from_utf8(&rest[..end]).map_err(|_| CodecError::InvalidUtf8(start))?;
        self.pos += end + 1;
        Ok(text.to_owned())
    }
}

// =============================================================================
// WRITER
// =============================================================================

/// Placeholder for a 16-bit forward offset.
///
/// Consumed by [`DataOutput::resolve_here`], so a pointer is patched at most once.
#[derive(Debug)]
#[must_use = "a deferred pointer left unresolved stays zero"]
pub struct DeferredPointer {
    slot: usize,
}

impl DeferredPointer {
    /// Offset of the placeholder bytes.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Growable little-endian writer.
#[derive(Debug, Clone, Default)]
pub struct DataOutput {
    buf: Vec<u8>,
}

impl DataOutput {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current write position.
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append an unsigned byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append a little-endian u16.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian u32.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian i16.
    #[inline]
    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian i32.
    #[inline]
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append a raw little-endian f32.
    #[inline]
    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append a boolean as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    /// Append a `usize` count as u16, failing if it does not fit.
    pub fn write_count16(&mut self, count: usize) -> Result<&mut Self, CodecError> {
        let value = u16::try_from(count).map_err(|_| CodecError::Overflow16(count))?;
        Ok(self.write_u16(value))
    }

    /// Append a string with a 1-byte length prefix.
    pub fn write_str(&mut self, value: &str) -> Result<&mut Self, CodecError> {
        if value.len() > MAX_PREFIXED_STR_LEN {
            return Err(CodecError::StringTooLong(value.len()));
        }
        self.write_u8(value.len() as u8);
        Ok(self.write_bytes(value.as_bytes()))
    }

    /// Append a null-terminated string.
    pub fn write_cstr(&mut self, value: &str) -> &mut Self {
        self.write_bytes(value.as_bytes()).write_u8(0)
    }

    /// Append string bytes with neither prefix nor terminator.
    pub fn write_raw_str(&mut self, value: &str) -> &mut Self {
        self.write_bytes(value.as_bytes())
    }

    /// Reserve a 2-byte pointer slot at the current position.
    pub fn alloc_pointer(&mut self) -> DeferredPointer {
        let slot = self.position();
        self.write_u16(0);
        DeferredPointer { slot }
    }

    /// Patch `ptr` with the current write position.
    ///
    /// Only the two placeholder bytes are touched.
    pub fn resolve_here(&mut self, ptr: DeferredPointer) -> Result<u16, CodecError> {
        let here = self.position();
        let offset = u16::try_from(here).map_err(|_| CodecError::Overflow16(here))?;
        self.buf[ptr.slot..ptr.slot + 2].copy_from_slice(&offset.to_le_bytes());
        Ok(offset)
    }

    /// Package the written bytes behind a u16 length header.
    pub fn into_packed(self) -> Result<Vec<u8>, CodecError> {
        pack_u16_prefixed(&self.buf)
    }
}

/// Prefix `content` with its length as a little-endian u16.
pub fn pack_u16_prefixed(content: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = u16::try_from(content.len()).map_err(|_| CodecError::Overflow16(content.len()))?;
    let mut out = Vec::with_capacity(content.len() + 2);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(content);
    Ok(out)
}

// =============================================================================
// TESTS
// =============================================================================
