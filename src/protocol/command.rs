//! Typed commands and their payload layouts.
//!
//! | name | dir | payload |
//! |---|---|---|
//! | `login` | agent → hub | u32 version, String secret |
//! | `exit` | either | (none) |
//! | `sendChannel` | agent → hub | u64 channel, String message |
//! | `sendChannelWebhook` | agent → hub | u64 channel, String message, String name, String avatar |
//! | `addReaction` | agent → hub | u64 channel, u64 message, String reaction |
//! | `subscribeChannel` | agent → hub | LongList channels |
//! | `unsubscribeChannel` | agent → hub | LongList channels |
//! | `onMessage` | hub → agent | see [`ChannelMessage`] |

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::frame::{Frame, FrameBuilder};
use super::wire_format::commands;
use crate::error::{LinkError, Result};

/// A chat message delivered to agents through `onMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Platform message id.
    pub message_id: u64,
    /// Channel the message was posted in.
    pub channel_id: u64,
    /// Author's user id.
    pub author_id: u64,
    /// Author's display name.
    pub author_name: String,
    /// Posted by a bot or webhook.
    pub is_automated: bool,
    /// Author's role ids at broadcast time.
    pub role_ids: Vec<u64>,
    /// Author's role color as RGB, if any.
    pub role_color: Option<u32>,
    /// Message text.
    pub content: String,
}

/// Every command of the link protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate the connection.
    Login {
        /// Protocol version of the sender.
        version: u32,
        /// Shared secret.
        secret: String,
    },
    /// Close the receiving side.
    Exit,
    /// Post a plain message.
    SendChannel {
        /// Target channel.
        channel_id: u64,
        /// Message text.
        message: String,
    },
    /// Post a message under a custom name and avatar.
    SendChannelWebhook {
        /// Target channel.
        channel_id: u64,
        /// Message text.
        message: String,
        /// Name shown as the author.
        display_name: String,
        /// Avatar image URL.
        avatar_url: String,
    },
    /// React to an existing message.
    AddReaction {
        /// Channel holding the message.
        channel_id: u64,
        /// Message to react to.
        message_id: u64,
        /// Emoji or reaction name.
        reaction: String,
    },
    /// Add channels to the remote filter.
    SubscribeChannel {
        /// Channels to add.
        channel_ids: Vec<u64>,
    },
    /// Remove channels from the remote filter.
    UnsubscribeChannel {
        /// Channels to remove.
        channel_ids: Vec<u64>,
    },
    /// A chat message in a subscribed channel.
    OnMessage(ChannelMessage),
}

impl Command {
    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => commands::LOGIN,
            Command::Exit => commands::EXIT,
            Command::SendChannel { .. } => commands::SEND_CHANNEL,
            Command::SendChannelWebhook { .. } => commands::SEND_CHANNEL_WEBHOOK,
            Command::AddReaction { .. } => commands::ADD_REACTION,
            Command::SubscribeChannel { .. } => commands::SUBSCRIBE_CHANNEL,
            Command::UnsubscribeChannel { .. } => commands::UNSUBSCRIBE_CHANNEL,
            Command::OnMessage(_) => commands::ON_MESSAGE,
        }
    }

    /// Encode this command as a complete frame.
    pub fn encode(&self) -> Result<Bytes> {
        let mut frame = FrameBuilder::new(self.name())?;

        match self {
            Command::Login { version, secret } => {
                frame.put_u32(*version).put_string(secret)?;
            }
            Command::Exit => {}
            Command::SendChannel {
                channel_id,
                message,
            } => {
                frame.put_u64(*channel_id).put_string(message)?;
            }
            Command::SendChannelWebhook {
                channel_id,
                message,
                display_name,
                avatar_url,
            } => {
                frame
                    .put_u64(*channel_id)
                    .put_string(message)?
                    .put_string(display_name)?
                    .put_string(avatar_url)?;
            }
            Command::AddReaction {
                channel_id,
                message_id,
                reaction,
            } => {
                frame
                    .put_u64(*channel_id)
                    .put_u64(*message_id)
                    .put_string(reaction)?;
            }
            Command::SubscribeChannel { channel_ids }
            | Command::UnsubscribeChannel { channel_ids } => {
                frame.put_long_list(channel_ids)?;
            }
            Command::OnMessage(msg) => {
                frame
                    .put_u64(msg.message_id)
                    .put_u64(msg.channel_id)
                    .put_u64(msg.author_id)
                    .put_string(&msg.author_name)?
                    .put_bool(msg.is_automated)
                    .put_long_list(&msg.role_ids)?;
                match msg.role_color {
                    Some(rgb) => frame.put_bool(true).put_u32(rgb),
                    None => frame.put_bool(false),
                };
                frame.put_string(&msg.content)?;
            }
        }

        frame.finish()
    }

    /// Decode a frame into a typed command.
    ///
    /// Trailing bytes after the last field are ignored.
    pub fn decode(frame: &Frame) -> Result<Self> {
        let mut r = frame.reader();

        let command = match frame.command() {
            commands::LOGIN => Command::Login {
                version: r.read_u32()?,
                secret: r.read_string()?,
            },
            commands::EXIT => Command::Exit,
            commands::SEND_CHANNEL => Command::SendChannel {
                channel_id: r.read_u64()?,
                message: r.read_string()?,
            },
            commands::SEND_CHANNEL_WEBHOOK => Command::SendChannelWebhook {
                channel_id: r.read_u64()?,
                message: r.read_string()?,
                display_name: r.read_string()?,
                avatar_url: r.read_string()?,
            },
            commands::ADD_REACTION => Command::AddReaction {
                channel_id: r.read_u64()?,
                message_id: r.read_u64()?,
                reaction: r.read_string()?,
            },
            commands::SUBSCRIBE_CHANNEL => Command::SubscribeChannel {
                channel_ids: r.read_long_list()?,
            },
            commands::UNSUBSCRIBE_CHANNEL => Command::UnsubscribeChannel {
                channel_ids: r.read_long_list()?,
            },
            commands::ON_MESSAGE => {
                let message_id = r.read_u64()?;
                let channel_id = r.read_u64()?;
                let author_id = r.read_u64()?;
                let author_name = r.read_string()?;
                let is_automated = r.read_bool()?;
                let role_ids = r.read_long_list()?;
                let role_color = if r.read_bool()? {
                    Some(r.read_u32()?)
                } else {
                    None
                };
                let content = r.read_string()?;

                Command::OnMessage(ChannelMessage {
                    message_id,
                    channel_id,
                    author_id,
                    author_name,
                    is_automated,
                    role_ids,
                    role_color,
                    content,
                })
            }
            other => return Err(LinkError::UnknownCommand(other.to_string())),
        };

        Ok(command)
    }
}
