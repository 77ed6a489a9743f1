//! Frame struct and frame encoding.
//!
//! A [`Frame`] is one decoded command: its name and the raw payload that
//! follows it. [`FrameBuilder`] produces the wire bytes for an outgoing frame,
//! patching the total length once the payload is complete.
//!
//! # Example
//!
//! ```
//! use relay_link::protocol::{FrameBuffer, FrameBuilder};
//!
//! let mut builder = FrameBuilder::new("sendChannel").unwrap();
//! builder.put_u64(42);
//! builder.put_string("hello").unwrap();
//! let bytes = builder.finish().unwrap();
//!
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&bytes).unwrap();
//! assert_eq!(frames[0].command(), "sendChannel");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{validate_frame_length, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use crate::codec::{self, PayloadReader};
use crate::error::{LinkError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command name.
    pub command: String,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from a command name and payload.
    pub fn new(command: impl Into<String>, payload: Bytes) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }

    /// Get the command name.
    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Cursor over the payload fields.
    #[inline]
    pub fn reader(&self) -> PayloadReader {
        PayloadReader::new(self.payload.clone())
    }

    /// Bytes this frame occupies on the wire.
    #[inline]
    pub fn wire_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + 2 + self.command.len() + self.payload.len()
    }
}

/// Incremental encoder for one outgoing frame.
#[derive(Debug)]
pub struct FrameBuilder {
    buf: BytesMut,
}

impl FrameBuilder {
    /// Start a frame for `command`; the length prefix is filled in by `finish`.
    pub fn new(command: &str) -> Result<Self> {
        Self::with_capacity(command, 64)
    }

    /// Start a frame with room for `payload_capacity` payload bytes.
    pub fn with_capacity(command: &str, payload_capacity: usize) -> Result<Self> {
        let mut buf =
            BytesMut::with_capacity(LENGTH_PREFIX_SIZE + 2 + command.len() + payload_capacity);
        buf.put_u32(0);
        codec::put_string(&mut buf, command)?;
        Ok(Self { buf })
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a 0/1 flag.
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        codec::put_bool(&mut self.buf, value);
        self
    }

    /// Append a big-endian u32.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append a big-endian u64.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64(value);
        self
    }

    /// Append a length-prefixed string.
    pub fn put_string(&mut self, value: &str) -> Result<&mut Self> {
        codec::put_string(&mut self.buf, value)?;
        Ok(self)
    }

    /// Append a count-prefixed u64 list.
    pub fn put_long_list(&mut self, values: &[u64]) -> Result<&mut Self> {
        codec::put_long_list(&mut self.buf, values)?;
        Ok(self)
    }

    /// Append raw, already-encoded payload bytes.
    pub fn put_slice(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    /// Patch the total length and return the wire bytes.
    ///
    /// Fails with [`LinkError::FrameLength`] if the frame is larger than any
    /// peer accepts.
    pub fn finish(mut self) -> Result<Bytes> {
        let total = u32::try_from(self.buf.len())
            .map_err(|_| LinkError::FrameLength(u32::MAX))?;
        validate_frame_length(total, MAX_FRAME_SIZE)?;
        self.buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&total.to_be_bytes());
        Ok(self.buf.freeze())
    }
}

/// Build a complete frame from a command name and an encoded payload.
pub fn build_frame(command: &str, payload: &[u8]) -> Result<Bytes> {
    let mut builder = FrameBuilder::with_capacity(command, payload.len())?;
    builder.put_slice(payload);
    builder.finish()
}
