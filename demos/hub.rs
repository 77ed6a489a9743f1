//! Hub - accepts agents and relays stdin lines as chat messages.
//!
//! This example demonstrates:
//! - Loading link settings from a JSON file with environment overrides
//! - Starting a hub with a stand-in chat platform that logs agent commands
//! - Broadcasting messages to subscribed agents
//!
//! # Running
//!
//! ```sh
//! echo '{"api_port":4000,"api_password":"secret"}' > link.json
//! RUST_LOG=debug cargo run --example hub -- link.json
//! ```
//!
//! Each stdin line of the form `<channel> <text>` is broadcast as a message
//! on that channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay_link::protocol::ChannelMessage;
use relay_link::{ChatPlatform, LinkSettings, ServerBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Chat platform that only logs what agents ask for.
struct LoggingPlatform;

impl ChatPlatform for LoggingPlatform {
    fn send_message(&self, channel_id: u64, message: &str) -> bool {
        info!(channel = channel_id, %message, "agent message");
        true
    }

    fn send_webhook_message(
        &self,
        channel_id: u64,
        message: &str,
        display_name: &str,
        avatar_url: &str,
    ) -> bool {
        info!(channel = channel_id, %display_name, %avatar_url, %message, "agent webhook message");
        true
    }

    fn add_reaction(&self, channel_id: u64, message_id: u64, reaction: &str) -> bool {
        info!(channel = channel_id, message = message_id, %reaction, "agent reaction");
        true
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "link.json".to_string());
    let settings = LinkSettings::load(&path)?;
    if !settings.is_valid_for_server() {
        return Err(format!("{}: api_port and api_password are required", path).into());
    }

    let server = ServerBuilder::new(settings.server_address(), settings.api_password.clone())
        .bind(Arc::new(LoggingPlatform))
        .await?;

    let next_id = AtomicU64::new(1);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some((channel, text)) = line.split_once(' ') else { continue };
                let Ok(channel_id) = channel.parse() else { continue };

                let message = ChannelMessage {
                    message_id: next_id.fetch_add(1, Ordering::Relaxed),
                    channel_id,
                    author_id: 0,
                    author_name: "hub".to_string(),
                    is_automated: true,
                    role_ids: Vec::new(),
                    role_color: None,
                    content: text.to_string(),
                };
                let delivered = server.broadcast(&message);
                info!(channel = channel_id, delivered, "broadcast");
            }
        }
    }

    server.close().await;
    Ok(())
}
