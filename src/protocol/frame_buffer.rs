//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Bytes from the
//! socket are appended as they arrive; a frame is cut out only once all of its
//! `total_length` bytes are present, and whatever follows stays buffered for
//! the next call.
//!
//! # Example
//!
//! ```
//! use relay_link::protocol::{build_frame, FrameBuffer};
//!
//! let bytes = build_frame("exit", b"").unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(frames[0].command(), "exit");
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{
    peek_frame_length, validate_frame_length, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE,
};
use super::Frame;
use crate::error::{LinkError, Result};

/// Default initial buffer capacity.
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Largest accepted total length.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 1,000,000 bytes.
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom frame size limit.
    pub fn with_max_frame(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            max_frame_size,
        }
    }

    /// Append raw bytes without decoding them.
    ///
    /// Pair with [`FrameBuffer::decode_next`] to handle each frame before the
    /// next one is examined.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns the frames in arrival order (may be empty if still waiting for
    /// data).
    ///
    /// # Errors
    ///
    /// Returns an error as soon as a corrupt frame is found, dropping any
    /// frames decoded before it in the same push. Readers that must act on
    /// every frame ahead of the corruption use [`FrameBuffer::extend`] and
    /// [`FrameBuffer::decode_next`] instead.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.decode_next()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the buffered bytes are corrupt
    pub fn decode_next(&mut self) -> Result<Option<Frame>> {
        let total = match peek_frame_length(&self.buffer) {
            Some(total) => total,
            None => return Ok(None),
        };

        validate_frame_length(total, self.max_frame_size)?;

        let total = total as usize;
        if self.buffer.len() < total {
            // Grow once for the whole frame instead of per read
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }

        let mut body = self.buffer.split_to(total).freeze();
        body.advance(LENGTH_PREFIX_SIZE);

        // total >= MIN_FRAME_SIZE, so the name prefix is always present
        let name_len = body.get_u16() as usize;
        if name_len > body.len() {
            return Err(LinkError::CorruptFrame(format!(
                "command name length {} exceeds frame body {}",
                name_len,
                body.len()
            )));
        }

        let name = body.split_to(name_len);
        let command = std::str::from_utf8(&name)
            .map_err(|e| LinkError::CorruptFrame(format!("command name is not UTF-8: {}", e)))?
            .to_string();

        Ok(Some(Frame::new(command, body)))
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
