//! Protocol module - wire format, framing, and typed commands.
//!
//! This module implements the binary protocol spoken on the link:
//! - 4-byte self-inclusive length prefix and command-name header
//! - Frame buffer for accumulating partial reads
//! - Typed [`Command`] encoding/decoding

mod command;
mod frame;
mod frame_buffer;
mod wire_format;

pub use command::{ChannelMessage, Command};
pub use frame::{build_frame, Frame, FrameBuilder};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    commands, peek_frame_length, validate_frame_length, LENGTH_PREFIX_SIZE, MAX_FIELD_LEN,
    MAX_FRAME_SIZE, MIN_FRAME_SIZE, NAME_PREFIX_SIZE, PROTOCOL_VERSION,
};
