//! Acceptor role: the hub side of the link.
//!
//! The [`Server`] accepts agent connections, authenticates each with a
//! `login` frame and then executes its commands against a [`ChatPlatform`].
//! Chat messages reported by the platform are fanned out with
//! [`Server::broadcast`] to every authenticated agent subscribed to the
//! message's channel.
//!
//! The set of live connections is a copy-on-write snapshot: accepts and
//! closes swap in a new list while a broadcast iterates the old one without
//! holding any lock.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_link::server::{ChatPlatform, ServerBuilder};
//!
//! struct Stdout;
//!
//! impl ChatPlatform for Stdout {
//!     fn send_message(&self, channel_id: u64, message: &str) -> bool {
//!         println!("#{}: {}", channel_id, message);
//!         true
//!     }
//!     fn send_webhook_message(&self, channel_id: u64, message: &str, name: &str, _avatar: &str) -> bool {
//!         println!("#{} <{}>: {}", channel_id, name, message);
//!         true
//!     }
//!     fn add_reaction(&self, _channel_id: u64, _message_id: u64, _reaction: &str) -> bool {
//!         false
//!     }
//! }
//!
//! # async fn run() -> relay_link::error::Result<()> {
//! let server = ServerBuilder::new("0.0.0.0:4000", "secret")
//!     .bind(Arc::new(Stdout))
//!     .await?;
//! println!("listening on {}", server.local_addr());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{CloseReason, Connection, FrameHandler, Role};
use crate::error::{LinkError, Result};
use crate::protocol::{ChannelMessage, Command, Frame, PROTOCOL_VERSION};
use crate::transport;
use crate::writer::WriterConfig;

/// The chat platform the hub relays agent commands to.
///
/// Each method returns `false` if the channel (or message) did not resolve;
/// the command is then dropped without affecting the connection.
pub trait ChatPlatform: Send + Sync + 'static {
    /// Post a plain message.
    fn send_message(&self, channel_id: u64, message: &str) -> bool;

    /// Post a message under a custom name and avatar.
    fn send_webhook_message(
        &self,
        channel_id: u64,
        message: &str,
        display_name: &str,
        avatar_url: &str,
    ) -> bool;

    /// React to an existing message.
    fn add_reaction(&self, channel_id: u64, message_id: u64, reaction: &str) -> bool;
}

/// A chat message as seen by the platform, ready to broadcast.
///
/// Role data is queried once per receiving connection at broadcast time.
pub trait PlatformMessage {
    /// Platform message id.
    fn message_id(&self) -> u64;
    /// Channel the message was posted in.
    fn channel_id(&self) -> u64;
    /// Author's user id.
    fn author_id(&self) -> u64;
    /// Author's display name.
    fn author_name(&self) -> &str;
    /// Posted by a bot or webhook.
    fn is_automated(&self) -> bool;
    /// Message text.
    fn content(&self) -> &str;
    /// Author's current role ids.
    fn role_ids(&self) -> Vec<u64>;
    /// Author's current role color as RGB.
    fn role_color(&self) -> Option<u32>;
}

impl PlatformMessage for ChannelMessage {
    fn message_id(&self) -> u64 {
        self.message_id
    }
    fn channel_id(&self) -> u64 {
        self.channel_id
    }
    fn author_id(&self) -> u64 {
        self.author_id
    }
    fn author_name(&self) -> &str {
        &self.author_name
    }
    fn is_automated(&self) -> bool {
        self.is_automated
    }
    fn content(&self) -> &str {
        &self.content
    }
    fn role_ids(&self) -> Vec<u64> {
        self.role_ids.clone()
    }
    fn role_color(&self) -> Option<u32> {
        self.role_color
    }
}

/// Builder for configuring and starting a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    bind: String,
    secret: String,
    writer_config: WriterConfig,
}

impl ServerBuilder {
    /// Create a builder listening on `bind` (`host:port`).
    pub fn new(bind: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            secret: secret.into(),
            writer_config: WriterConfig::default(),
        }
    }

    /// Set the per-connection cap on bytes queued but not yet written.
    ///
    /// Default: 1,000,000
    pub fn max_pending_bytes(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_bytes = limit;
        self
    }

    /// Bind the listener and start accepting connections.
    pub async fn bind<P: ChatPlatform>(self, platform: Arc<P>) -> Result<Server> {
        let listener = transport::listen(self.bind.as_str()).await?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ServerShared {
            secret: self.secret,
            platform,
            writer_config: self.writer_config,
            peers: ArcSwap::from_pointee(Vec::new()),
            next_peer_id: AtomicU64::new(1),
        });

        let accept_task = tokio::spawn(accept_loop(listener, Arc::downgrade(&shared)));
        info!(%local_addr, "hub listening");

        Ok(Server {
            shared,
            local_addr,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }
}

struct ServerShared {
    secret: String,
    platform: Arc<dyn ChatPlatform>,
    writer_config: WriterConfig,
    peers: ArcSwap<Vec<Arc<Peer>>>,
    next_peer_id: AtomicU64,
}

impl ServerShared {
    fn add_peer(&self, peer: Arc<Peer>) {
        self.peers.rcu(|peers| {
            let mut next = Vec::with_capacity(peers.len() + 1);
            next.extend(peers.iter().cloned());
            next.push(peer.clone());
            next
        });
    }

    fn remove_peer(&self, id: u64) {
        self.peers.rcu(|peers| {
            peers
                .iter()
                .filter(|peer| peer.session.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// One accepted agent connection.
struct Peer {
    connection: Connection,
    session: Arc<PeerSession>,
}

/// Session state and command handling for one accepted connection.
struct PeerSession {
    id: u64,
    addr: SocketAddr,
    authenticated: AtomicBool,
    channels: Mutex<HashSet<u64>>,
    server: Weak<ServerShared>,
}

impl PeerSession {
    fn is_subscribed(&self, channel_id: u64) -> bool {
        self.authenticated.load(Ordering::Acquire) && self.channels.lock().contains(&channel_id)
    }

    fn login(&self, server: &ServerShared, version: u32, secret: &str) -> Result<()> {
        if version != PROTOCOL_VERSION {
            return Err(LinkError::Protocol(format!(
                "unsupported protocol version {}",
                version
            )));
        }
        if secret != server.secret {
            return Err(LinkError::Protocol("invalid shared secret".to_string()));
        }

        self.authenticated.store(true, Ordering::Release);
        info!(peer = %self.addr, "successful login");
        Ok(())
    }
}

impl FrameHandler for PeerSession {
    fn handle_frame(&self, frame: Frame) -> Result<()> {
        let server = match self.server.upgrade() {
            Some(server) => server,
            None => return Err(LinkError::ConnectionClosed),
        };

        let command = Command::decode(&frame)?;

        if !self.authenticated.load(Ordering::Acquire) {
            return match command {
                Command::Login { version, secret } => self.login(&server, version, &secret),
                other => Err(LinkError::Protocol(format!(
                    "{} before login",
                    other.name()
                ))),
            };
        }

        match command {
            Command::SendChannel {
                channel_id,
                message,
            } => {
                if !server.platform.send_message(channel_id, &message) {
                    debug!(peer = %self.addr, channel = channel_id, "send: channel not resolved");
                }
            }
            Command::SendChannelWebhook {
                channel_id,
                message,
                display_name,
                avatar_url,
            } => {
                if !server.platform.send_webhook_message(
                    channel_id,
                    &message,
                    &display_name,
                    &avatar_url,
                ) {
                    debug!(peer = %self.addr, channel = channel_id, "webhook: channel not resolved");
                }
            }
            Command::AddReaction {
                channel_id,
                message_id,
                reaction,
            } => {
                if !server.platform.add_reaction(channel_id, message_id, &reaction) {
                    debug!(
                        peer = %self.addr,
                        channel = channel_id,
                        message = message_id,
                        "reaction: message not resolved"
                    );
                }
            }
            Command::SubscribeChannel { channel_ids } => {
                self.channels.lock().extend(channel_ids);
            }
            Command::UnsubscribeChannel { channel_ids } => {
                let mut channels = self.channels.lock();
                for id in channel_ids {
                    channels.remove(&id);
                }
            }
            Command::Login { .. } => {
                return Err(LinkError::Protocol("login after authentication".to_string()));
            }
            other => return Err(LinkError::UnknownCommand(other.name().to_string())),
        }

        Ok(())
    }

    fn on_closed(&self, reason: &CloseReason) {
        info!(peer = %self.addr, %reason, "agent disconnected");
        if let Some(server) = self.server.upgrade() {
            server.remove_peer(self.id);
        }
    }
}

async fn accept_loop(listener: TcpListener, server: Weak<ServerShared>) {
    loop {
        let (stream, addr) = match transport::accept(&listener).await {
            Ok(accepted) => accepted,
            Err(LinkError::Io(e))
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
                ) =>
            {
                debug!(error = %e, "accept aborted");
                continue;
            }
            Err(e) => {
                error!(error = %e, "listening failed");
                return;
            }
        };

        let server = match server.upgrade() {
            Some(server) => server,
            None => return,
        };

        let session = Arc::new(PeerSession {
            id: server.next_peer_id.fetch_add(1, Ordering::Relaxed),
            addr,
            authenticated: AtomicBool::new(false),
            channels: Mutex::new(HashSet::new()),
            server: Arc::downgrade(&server),
        });
        let connection = Connection::new(Role::Acceptor, server.writer_config.clone());

        server.add_peer(Arc::new(Peer {
            connection: connection.clone(),
            session: session.clone(),
        }));

        if let Err(e) = connection.init(stream, session.clone(), Vec::new()) {
            warn!(peer = %addr, error = %e, "failed to start connection");
            server.remove_peer(session.id);
            continue;
        }

        info!(peer = %addr, "connection from agent");
    }
}

/// A running hub.
pub struct Server {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder(bind: impl Into<String>, secret: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(bind, secret)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live connections, authenticated or not.
    pub fn connection_count(&self) -> usize {
        self.shared.peers.load().len()
    }

    /// Number of connections that completed login.
    pub fn authenticated_count(&self) -> usize {
        self.shared
            .peers
            .load()
            .iter()
            .filter(|peer| peer.session.authenticated.load(Ordering::Acquire))
            .count()
    }

    /// Number of authenticated connections subscribed to `channel_id`.
    pub fn subscriber_count(&self, channel_id: u64) -> usize {
        self.shared
            .peers
            .load()
            .iter()
            .filter(|peer| peer.session.is_subscribed(channel_id))
            .count()
    }

    /// Send `message` to every active, authenticated connection subscribed
    /// to its channel.
    ///
    /// Returns how many connections the notification was queued on.
    pub fn broadcast(&self, message: &dyn PlatformMessage) -> usize {
        let channel_id = message.channel_id();
        let peers = self.shared.peers.load();
        let mut delivered = 0;

        for peer in peers.iter() {
            if !peer.connection.is_active() || !peer.session.is_subscribed(channel_id) {
                continue;
            }

            let notification = Command::OnMessage(ChannelMessage {
                message_id: message.message_id(),
                channel_id,
                author_id: message.author_id(),
                author_name: message.author_name().to_string(),
                is_automated: message.is_automated(),
                role_ids: message.role_ids(),
                role_color: message.role_color(),
                content: message.content().to_string(),
            });

            match notification
                .encode()
                .and_then(|frame| peer.connection.write(frame))
            {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(peer = %peer.session.addr, error = %e, "broadcast dropped");
                }
            }
        }

        delivered
    }

    /// Stop accepting and close every connection.
    pub async fn close(&self) {
        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            task.abort();
            let _ = task.await;
        }

        let peers = self.shared.peers.load_full();
        for peer in peers.iter() {
            peer.connection.close().await;
        }
        self.shared.peers.store(Arc::new(Vec::new()));
        info!(local_addr = %self.local_addr, "hub closed");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        for peer in self.shared.peers.load().iter() {
            peer.connection.shutdown();
        }
    }
}
