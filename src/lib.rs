//! # relay-link
//!
//! Framed TCP link between a chat relay hub and its agents.
//!
//! The hub ([`Server`]) owns the chat platform integration and listens for
//! agents. Each agent ([`Client`]) connects, authenticates with a shared
//! secret, subscribes to the channels it has handlers for and then exchanges
//! typed commands with the hub. Agents reconnect on their own and resynchronize
//! their subscriptions after every reconnect.
//!
//! ## Architecture
//!
//! - **Protocol**: length-prefixed frames carrying a command name and a fixed
//!   field layout per command ([`protocol`], [`codec`])
//! - **Connection engine**: one read loop and one writer task per socket with a
//!   byte-capped pending queue ([`connection`], [`writer`])
//! - **Roles**: login and resync on the agent, login validation and broadcast
//!   filtering on the hub ([`client`], [`server`])
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_link::handler::MessageHandler;
//! use relay_link::protocol::ChannelMessage;
//! use relay_link::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ClientBuilder::new("localhost:4000", "secret").connect().await;
//!
//!     let handler: Arc<dyn MessageHandler> = Arc::new(|msg: &ChannelMessage| {
//!         println!("[{}] {}", msg.author_name, msg.content);
//!     });
//!     client.register_message_handler(&handler, &[10]);
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     client.close().await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod reconnect;
pub mod server;
pub mod transport;
pub mod writer;

mod backpressure;

pub use backpressure::{PendingBytes, DEFAULT_MAX_PENDING_BYTES};
pub use client::{Client, ClientBuilder};
pub use config::LinkSettings;
pub use connection::{CloseReason, Connection, ConnectionState, FrameHandler, Role};
pub use error::LinkError;
pub use handler::MessageHandler;
pub use server::{ChatPlatform, PlatformMessage, Server, ServerBuilder};
