//! Primitive field encoding shared by every command payload.
//!
//! ```text
//! String   := u16(len) utf8_bytes
//! LongList := u16(count) u64[count]
//! ```
//!
//! Integers are Big Endian. Reads never silently truncate: a field that runs
//! past the end of the payload is [`LinkError::Truncated`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{LinkError, Result};
use crate::protocol::MAX_FIELD_LEN;

/// Append a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    let data = value.as_bytes();
    if data.len() > MAX_FIELD_LEN {
        return Err(LinkError::OversizedField(data.len()));
    }
    buf.reserve(2 + data.len());
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Append a count-prefixed list of u64 values.
pub fn put_long_list(buf: &mut BytesMut, values: &[u64]) -> Result<()> {
    if values.len() > MAX_FIELD_LEN {
        return Err(LinkError::OversizedField(values.len()));
    }
    buf.reserve(2 + values.len() * 8);
    buf.put_u16(values.len() as u16);
    for value in values {
        buf.put_u64(*value);
    }
    Ok(())
}

/// Append a boolean as a single 0/1 byte.
#[inline]
pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Cursor over a frame payload.
///
/// Wraps `Bytes`, so strings and sub-slices are split off without copying
/// until they are turned into owned values.
#[derive(Debug, Clone)]
pub struct PayloadReader {
    buf: Bytes,
}

impl PayloadReader {
    /// Create a reader over `payload`.
    pub fn new(payload: Bytes) -> Self {
        Self { buf: payload }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(LinkError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a 0/1 flag. Any non-zero byte counts as `true`.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Read a big-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        self.ensure(2)?;
        let len = self.buf.get_u16() as usize;
        self.ensure(len)?;
        let data = self.buf.split_to(len);
        String::from_utf8(data.to_vec())
            .map_err(|e| LinkError::CorruptFrame(format!("invalid UTF-8 string: {}", e)))
    }

    /// Read a count-prefixed list of u64 values.
    pub fn read_long_list(&mut self) -> Result<Vec<u64>> {
        self.ensure(2)?;
        let count = self.buf.get_u16() as usize;
        self.ensure(count * 8)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.buf.get_u64());
        }
        Ok(values)
    }
}
