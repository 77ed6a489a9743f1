//! Agent - prints hub messages as JSON and sends stdin lines to its channel.
//!
//! This example demonstrates:
//! - Connecting a client that reconnects on its own
//! - Registering a message handler for one channel
//! - Sending messages from the agent to the hub
//!
//! # Running
//!
//! ```sh
//! echo '{"api_port":4000,"api_password":"secret","channel_id":10}' > agent.json
//! cargo run --example agent -- agent.json
//! ```

use std::sync::Arc;

use relay_link::handler::MessageHandler;
use relay_link::protocol::ChannelMessage;
use relay_link::{ClientBuilder, LinkSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "agent.json".to_string());
    let settings = LinkSettings::load(&path)?;
    let channel_id = match settings.channel_id {
        Some(id) if settings.is_valid_for_client() => id,
        _ => return Err(format!("{}: api_port, api_password and channel_id are required", path).into()),
    };

    let client = ClientBuilder::new(settings.client_address(), settings.api_password.clone())
        .connect()
        .await;

    let printer: Arc<dyn MessageHandler> = Arc::new(|msg: &ChannelMessage| {
        match serde_json::to_string(msg) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "failed to render message"),
        }
    });
    client.register_message_handler(&printer, &[channel_id]);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Err(e) = client.send_message(channel_id, &line) {
                    warn!(error = %e, "message not sent");
                }
            }
        }
    }

    client.close().await;
    Ok(())
}
