//! Wire format constants and the frame length prefix.
//!
//! Every frame starts with a 4-byte length that counts itself:
//! ```text
//! ┌──────────────┬───────────┬──────────────┬─────────────┐
//! │ Total length │ Name len  │ Command name │ Payload     │
//! │ 4 bytes      │ 2 bytes   │ N bytes      │ M bytes     │
//! │ uint32 BE    │ uint16 BE │ UTF-8        │ per command │
//! └──────────────┴───────────┴──────────────┴─────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{LinkError, Result};

/// Size of the total-length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the command-name length prefix in bytes.
pub const NAME_PREFIX_SIZE: usize = 2;

/// Smallest legal frame: length prefix plus an empty command name.
pub const MIN_FRAME_SIZE: u32 = (LENGTH_PREFIX_SIZE + NAME_PREFIX_SIZE) as u32;

/// Largest frame a peer will accept.
pub const MAX_FRAME_SIZE: u32 = 1_000_000;

/// Largest string or list carried by a 16-bit prefix.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Protocol version sent in `login` and checked by the hub.
pub const PROTOCOL_VERSION: u32 = 1;

/// Command names as they appear on the wire.
pub mod commands {
    /// Either direction: graceful close of the receiving side.
    pub const EXIT: &str = "exit";
    /// Agent to hub: version and shared secret.
    pub const LOGIN: &str = "login";
    /// Agent to hub: plain channel message.
    pub const SEND_CHANNEL: &str = "sendChannel";
    /// Agent to hub: message posted through a channel webhook.
    pub const SEND_CHANNEL_WEBHOOK: &str = "sendChannelWebhook";
    /// Agent to hub: reaction on an existing message.
    pub const ADD_REACTION: &str = "addReaction";
    /// Agent to hub: add channels to the connection's filter.
    pub const SUBSCRIBE_CHANNEL: &str = "subscribeChannel";
    /// Agent to hub: remove channels from the connection's filter.
    pub const UNSUBSCRIBE_CHANNEL: &str = "unsubscribeChannel";
    /// Hub to agent: a chat message in a subscribed channel.
    pub const ON_MESSAGE: &str = "onMessage";
}

/// Read the total-length prefix at the start of `buf`.
///
/// Returns `None` if fewer than 4 bytes are available.
#[inline]
pub fn peek_frame_length(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Check a total-length prefix against `[MIN_FRAME_SIZE, max_frame_size]`.
pub fn validate_frame_length(length: u32, max_frame_size: u32) -> Result<()> {
    if length < MIN_FRAME_SIZE || length > max_frame_size {
        return Err(LinkError::FrameLength(length));
    }
    Ok(())
}
