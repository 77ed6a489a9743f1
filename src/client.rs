//! Initiator role: the agent side of the link.
//!
//! The [`ClientBuilder`] configures the hub address, shared secret and
//! tuning knobs. The [`Client`] manages the lifecycle:
//! 1. Connect to the hub
//! 2. Queue `login` followed by a `subscribeChannel` resync of every channel
//!    that has a handler
//! 3. Dispatch inbound `onMessage` frames to the handlers of that channel
//! 4. On any close not caused by [`Client::close`], reconnect after a fixed
//!    delay and repeat from 1
//!
//! A failed initial connect is not an error: the client keeps retrying in
//! the background, and outbound commands fail with `ConnectionClosed` until
//! the link is up.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_link::handler::MessageHandler;
//! use relay_link::protocol::ChannelMessage;
//! use relay_link::ClientBuilder;
//!
//! # async fn run() -> relay_link::error::Result<()> {
//! let client = ClientBuilder::new("localhost:4000", "secret").connect().await;
//!
//! let printer: Arc<dyn MessageHandler> = Arc::new(|msg: &ChannelMessage| {
//!     println!("{}: {}", msg.author_name, msg.content);
//! });
//! client.register_message_handler(&printer, &[10, 20]);
//!
//! client.send_message(10, "hello")?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, Connection, FrameHandler, Role};
use crate::error::{LinkError, Result};
use crate::handler::{MessageHandler, SubscriptionRegistry};
use crate::protocol::{Command, Frame, MAX_FIELD_LEN, PROTOCOL_VERSION};
use crate::reconnect::{ReconnectScheduler, DEFAULT_RECONNECT_DELAY};
use crate::transport;
use crate::writer::WriterConfig;

/// Builder for configuring and creating a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    addr: String,
    secret: String,
    protocol_version: u32,
    reconnect_delay: Duration,
    writer_config: WriterConfig,
}

impl ClientBuilder {
    /// Create a builder for the hub at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            secret: secret.into(),
            protocol_version: PROTOCOL_VERSION,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            writer_config: WriterConfig::default(),
        }
    }

    /// Set the delay between a disconnect and the next connect attempt.
    ///
    /// Default: 10 seconds
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the cap on bytes queued but not yet written.
    ///
    /// Default: 1,000,000
    pub fn max_pending_bytes(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_bytes = limit;
        self
    }

    /// Override the protocol version sent in `login`.
    pub fn protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Build the client and make the first connect attempt.
    ///
    /// Never fails: if the hub is unreachable a reconnect is scheduled.
    pub async fn connect(self) -> Client {
        let inner = Arc::new(ClientInner {
            addr: self.addr,
            secret: self.secret,
            protocol_version: self.protocol_version,
            connection: Connection::new(Role::Initiator, self.writer_config),
            subscriptions: Mutex::new(SubscriptionRegistry::new()),
            reconnect: ReconnectScheduler::new(self.reconnect_delay),
            shutdown: AtomicBool::new(false),
        });

        if let Err(e) = connect_once(&inner).await {
            warn!(addr = %inner.addr, error = %e, "connect failed");
            schedule_reconnect(&inner);
        }

        Client { inner }
    }
}

struct ClientInner {
    addr: String,
    secret: String,
    protocol_version: u32,
    connection: Connection,
    /// Held across compute-delta, apply and enqueue, and across the resync
    /// snapshot at connect.
    subscriptions: Mutex<SubscriptionRegistry>,
    reconnect: ReconnectScheduler,
    /// Set by [`Client::close`]; never cleared.
    shutdown: AtomicBool,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reconnect.cancel();
        self.connection.shutdown();
    }
}

/// A connected (or reconnecting) agent.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder(addr: impl Into<String>, secret: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(addr, secret)
    }

    /// Post `message` to `channel_id`.
    pub fn send_message(&self, channel_id: u64, message: &str) -> Result<()> {
        self.send(Command::SendChannel {
            channel_id,
            message: message.to_string(),
        })
    }

    /// Post `message` to `channel_id` under a custom name and avatar.
    pub fn send_webhook_message(
        &self,
        channel_id: u64,
        message: &str,
        display_name: &str,
        avatar_url: &str,
    ) -> Result<()> {
        self.send(Command::SendChannelWebhook {
            channel_id,
            message: message.to_string(),
            display_name: display_name.to_string(),
            avatar_url: avatar_url.to_string(),
        })
    }

    /// React to message `message_id` in `channel_id`.
    pub fn add_reaction(&self, channel_id: u64, message_id: u64, reaction: &str) -> Result<()> {
        self.send(Command::AddReaction {
            channel_id,
            message_id,
            reaction: reaction.to_string(),
        })
    }

    /// Register `handler` for `channels`.
    ///
    /// Channels that had no handler before are subscribed on the hub. Keep the
    /// `Arc` to unregister later; membership is by identity.
    pub fn register_message_handler(&self, handler: &Arc<dyn MessageHandler>, channels: &[u64]) {
        let mut subscriptions = self.inner.subscriptions.lock();
        let added = subscriptions.register(handler, channels);
        self.forward_delta(&added, true);
    }

    /// Remove `handler` from every channel.
    ///
    /// Channels left without a handler are unsubscribed on the hub.
    pub fn unregister_message_handler(&self, handler: &Arc<dyn MessageHandler>) {
        let mut subscriptions = self.inner.subscriptions.lock();
        let abandoned = subscriptions.unregister(handler);
        self.forward_delta(&abandoned, false);
    }

    /// Remove `handler` from `channels` only.
    pub fn unsubscribe_channels(&self, handler: &Arc<dyn MessageHandler>, channels: &[u64]) {
        let mut subscriptions = self.inner.subscriptions.lock();
        let abandoned = subscriptions.unsubscribe(handler, channels);
        self.forward_delta(&abandoned, false);
    }

    /// Channels that currently have at least one handler.
    pub fn subscribed_channels(&self) -> Vec<u64> {
        self.inner.subscriptions.lock().channels()
    }

    /// Whether the link to the hub is up.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_active()
    }

    /// Whether a reconnect is waiting for its delay.
    pub fn is_reconnect_pending(&self) -> bool {
        self.inner.reconnect.is_pending()
    }

    /// Stop reconnecting and close the link.
    pub async fn close(&self) {
        {
            let _subscriptions = self.inner.subscriptions.lock();
            self.inner.shutdown.store(true, Ordering::SeqCst);
        }
        self.inner.reconnect.cancel();
        self.inner.connection.close().await;
        info!(addr = %self.inner.addr, "client closed");
    }

    fn send(&self, command: Command) -> Result<()> {
        let frame = command.encode()?;
        self.inner.connection.write(frame)
    }

    /// Send a subscribe/unsubscribe delta. Caller holds the subscription lock.
    fn forward_delta(&self, channels: &[u64], subscribe: bool) {
        if channels.is_empty() {
            return;
        }

        let frames = match channel_list_frames(channels, subscribe) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "failed to encode subscription delta");
                return;
            }
        };

        for frame in frames {
            match self.inner.connection.write(frame) {
                Ok(()) => {}
                // Resynced in full on the next connect
                Err(LinkError::ConnectionClosed) => return,
                Err(e) => {
                    // A lost delta desynchronizes the hub; reconnect to resync
                    warn!(error = %e, "subscription delta dropped, forcing resync");
                    self.inner.connection.shutdown();
                    return;
                }
            }
        }
    }
}

/// Encode `channels` as one or more subscribe/unsubscribe frames.
fn channel_list_frames(channels: &[u64], subscribe: bool) -> Result<Vec<Bytes>> {
    channels
        .chunks(MAX_FIELD_LEN)
        .map(|chunk| {
            let channel_ids = chunk.to_vec();
            let command = if subscribe {
                Command::SubscribeChannel { channel_ids }
            } else {
                Command::UnsubscribeChannel { channel_ids }
            };
            command.encode()
        })
        .collect()
}

/// One connect attempt: open the socket, then start a session on it.
async fn connect_once(inner: &Arc<ClientInner>) -> Result<()> {
    let stream = transport::connect(inner.addr.as_str()).await?;
    open_session(inner, stream)
}

fn open_session(inner: &Arc<ClientInner>, stream: tokio::net::TcpStream) -> Result<()> {
    let subscriptions = inner.subscriptions.lock();
    if inner.shutdown.load(Ordering::SeqCst) {
        debug!("client closed during connect, dropping socket");
        return Ok(());
    }

    let mut preamble = vec![Command::Login {
        version: inner.protocol_version,
        secret: inner.secret.clone(),
    }
    .encode()?];
    preamble.extend(channel_list_frames(&subscriptions.channels(), true)?);

    let session = Arc::new(ClientSession {
        client: Arc::downgrade(inner),
    });
    inner.connection.init(stream, session, preamble)?;

    info!(
        addr = %inner.addr,
        channels = subscriptions.len(),
        "connected to hub"
    );
    Ok(())
}

fn schedule_reconnect(inner: &Arc<ClientInner>) {
    if inner.shutdown.load(Ordering::SeqCst) {
        return;
    }

    let client = Arc::downgrade(inner);
    let scheduled = inner.reconnect.schedule(move || async move {
        if let Some(inner) = client.upgrade() {
            reconnect_attempt(inner).await;
        }
    });
    if scheduled {
        info!(
            addr = %inner.addr,
            delay_ms = inner.reconnect.delay().as_millis() as u64,
            "will reconnect"
        );
    }
}

async fn reconnect_attempt(inner: Arc<ClientInner>) {
    if inner.shutdown.load(Ordering::SeqCst) {
        return;
    }

    debug!(addr = %inner.addr, "reconnecting");
    if let Err(e) = connect_once(&inner).await {
        warn!(addr = %inner.addr, error = %e, "reconnect failed");
        schedule_reconnect(&inner);
    }
}

/// Session logic for one client connection generation.
struct ClientSession {
    client: Weak<ClientInner>,
}

impl FrameHandler for ClientSession {
    fn handle_frame(&self, frame: Frame) -> Result<()> {
        let inner = match self.client.upgrade() {
            Some(inner) => inner,
            None => return Err(LinkError::ConnectionClosed),
        };

        match Command::decode(&frame)? {
            Command::OnMessage(message) => {
                let handlers = inner.subscriptions.lock().handlers_for(message.channel_id);
                if handlers.is_empty() {
                    debug!(channel = message.channel_id, "message for unsubscribed channel");
                }
                for handler in handlers {
                    handler.on_message(&message);
                }
                Ok(())
            }
            other => Err(LinkError::UnknownCommand(other.name().to_string())),
        }
    }

    fn on_closed(&self, reason: &CloseReason) {
        let inner = match self.client.upgrade() {
            Some(inner) => inner,
            None => return,
        };

        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }

        info!(addr = %inner.addr, %reason, "disconnected from hub");
        schedule_reconnect(&inner);
    }
}
