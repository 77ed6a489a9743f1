//! Integration tests for relay-link.
//!
//! These tests run hub and agent over loopback TCP. Where the exact bytes an
//! agent sends matter, a scripted hub built from the protocol types stands in
//! for the real [`Server`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use relay_link::handler::MessageHandler;
use relay_link::protocol::{ChannelMessage, Command, FrameBuffer, PROTOCOL_VERSION};
use relay_link::{ChatPlatform, Client, ClientBuilder, LinkError, Server, ServerBuilder};

const SECRET: &str = "integration-secret";
const STEP: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct RecordingPlatform {
    messages: Mutex<Vec<(u64, String)>>,
    webhooks: Mutex<Vec<(u64, String, String, String)>>,
    reactions: Mutex<Vec<(u64, u64, String)>>,
}

impl ChatPlatform for RecordingPlatform {
    fn send_message(&self, channel_id: u64, message: &str) -> bool {
        self.messages.lock().push((channel_id, message.to_string()));
        true
    }

    fn send_webhook_message(
        &self,
        channel_id: u64,
        message: &str,
        display_name: &str,
        avatar_url: &str,
    ) -> bool {
        self.webhooks.lock().push((
            channel_id,
            message.to_string(),
            display_name.to_string(),
            avatar_url.to_string(),
        ));
        true
    }

    fn add_reaction(&self, channel_id: u64, message_id: u64, reaction: &str) -> bool {
        self.reactions
            .lock()
            .push((channel_id, message_id, reaction.to_string()));
        true
    }
}

async fn start_hub() -> (Server, Arc<RecordingPlatform>) {
    let platform = Arc::new(RecordingPlatform::default());
    let server = ServerBuilder::new("127.0.0.1:0", SECRET)
        .bind(platform.clone())
        .await
        .unwrap();
    (server, platform)
}

async fn connect_agent(addr: impl ToString) -> Client {
    ClientBuilder::new(addr.to_string(), SECRET)
        .reconnect_delay(Duration::from_millis(50))
        .connect()
        .await
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + STEP;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Handler that records every message it receives.
fn recording_handler() -> (Arc<dyn MessageHandler>, Arc<Mutex<Vec<ChannelMessage>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handler: Arc<dyn MessageHandler> = Arc::new(move |msg: &ChannelMessage| {
        sink.lock().push(msg.clone());
    });
    (handler, received)
}

fn chat_message(channel_id: u64, author_name: &str) -> ChannelMessage {
    ChannelMessage {
        message_id: 1000 + channel_id,
        channel_id,
        author_id: 77,
        author_name: author_name.to_string(),
        is_automated: false,
        role_ids: vec![1, 2],
        role_color: None,
        content: "hello agents".to_string(),
    }
}

/// Scripted hub speaking the protocol directly.
struct ScriptedHub {
    listener: TcpListener,
}

impl ScriptedHub {
    async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    async fn bind_to(addr: &str) -> Self {
        Self {
            listener: TcpListener::bind(addr).await.unwrap(),
        }
    }

    fn addr(&self) -> String {
        self.listener.local_addr().unwrap().to_string()
    }

    async fn accept(&self) -> ScriptedPeer {
        let (stream, _) = timeout(STEP, self.listener.accept())
            .await
            .expect("agent did not connect")
            .unwrap();
        ScriptedPeer {
            stream,
            buffer: FrameBuffer::new(),
            ready: Vec::new(),
        }
    }
}

struct ScriptedPeer {
    stream: TcpStream,
    buffer: FrameBuffer,
    ready: Vec<Command>,
}

impl ScriptedPeer {
    /// Next command from the agent, or `None` once it closed the socket.
    async fn next(&mut self) -> Option<Command> {
        let mut buf = [0u8; 4096];
        while self.ready.is_empty() {
            let n = timeout(STEP, self.stream.read(&mut buf))
                .await
                .expect("agent went silent")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
            for frame in self.buffer.push(&buf[..n]).unwrap() {
                self.ready.push(Command::decode(&frame).unwrap());
            }
        }
        Some(self.ready.remove(0))
    }

    async fn expect(&mut self) -> Command {
        self.next().await.expect("agent closed unexpectedly")
    }

    async fn expect_login(&mut self) {
        assert_eq!(
            self.expect().await,
            Command::Login {
                version: PROTOCOL_VERSION,
                secret: SECRET.to_string(),
            }
        );
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }
}

// ============================================================================
// End-to-end hub and agent
// ============================================================================

#[tokio::test]
async fn test_subscribed_agent_receives_broadcast() {
    let (server, _platform) = start_hub().await;
    let client = connect_agent(server.local_addr()).await;

    let (handler, received) = recording_handler();
    client.register_message_handler(&handler, &[10, 20]);

    eventually("subscription on hub", || server.subscriber_count(20) == 1).await;

    assert_eq!(server.broadcast(&chat_message(20, "Alice")), 1);
    assert_eq!(server.broadcast(&chat_message(30, "Bob")), 0);

    eventually("message delivery", || !received.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let received = received.lock();
    assert_eq!(received.len(), 1);
    let msg = &received[0];
    assert_eq!(msg.channel_id, 20);
    assert_eq!(msg.author_name, "Alice");
    assert!(!msg.is_automated);
    assert_eq!(msg.role_ids, vec![1, 2]);
    assert_eq!(msg.role_color, None);
    assert_eq!(msg.content, "hello agents");

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_agent_commands_reach_platform() {
    let (server, platform) = start_hub().await;
    let client = connect_agent(server.local_addr()).await;
    eventually("login", || server.authenticated_count() == 1).await;

    client.send_message(5, "plain").unwrap();
    client
        .send_webhook_message(5, "as steve", "Steve", "https://example.invalid/s.png")
        .unwrap();
    client.add_reaction(5, 99, "👍").unwrap();

    eventually("reaction", || platform.reactions.lock().len() == 1).await;
    assert_eq!(platform.messages.lock()[0], (5, "plain".to_string()));
    assert_eq!(platform.webhooks.lock()[0].2, "Steve");
    assert_eq!(platform.reactions.lock()[0], (5, 99, "👍".to_string()));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_handlers_sharing_a_channel() {
    let (server, _platform) = start_hub().await;
    let client = connect_agent(server.local_addr()).await;

    let (first, first_seen) = recording_handler();
    let (second, second_seen) = recording_handler();
    client.register_message_handler(&first, &[10]);
    client.register_message_handler(&second, &[10]);
    eventually("subscription", || server.subscriber_count(10) == 1).await;

    server.broadcast(&chat_message(10, "Carol"));
    eventually("both handlers", || {
        first_seen.lock().len() == 1 && second_seen.lock().len() == 1
    })
    .await;

    // The channel stays subscribed while `second` remains
    client.unregister_message_handler(&first);
    client.send_message(0, "barrier").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.subscriber_count(10), 1);

    client.unregister_message_handler(&second);
    eventually("unsubscribe", || server.subscriber_count(10) == 0).await;

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_wrong_secret_never_authenticates() {
    let (server, _platform) = start_hub().await;
    let client = ClientBuilder::new(server.local_addr().to_string(), "wrong")
        .reconnect_delay(Duration::from_millis(50))
        .connect()
        .await;

    let (handler, _) = recording_handler();
    client.register_message_handler(&handler, &[1]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.authenticated_count(), 0);
    assert_eq!(server.subscriber_count(1), 0);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_agent_survives_hub_restart() {
    let (server, _platform) = start_hub().await;
    let addr = server.local_addr();
    let client = connect_agent(addr).await;

    let (handler, received) = recording_handler();
    client.register_message_handler(&handler, &[42]);
    eventually("first subscription", || server.subscriber_count(42) == 1).await;

    server.close().await;
    drop(server);
    eventually("disconnect", || !client.is_connected()).await;

    let platform = Arc::new(RecordingPlatform::default());
    let server = ServerBuilder::new(addr.to_string(), SECRET)
        .bind(platform)
        .await
        .unwrap();
    eventually("resubscription", || server.subscriber_count(42) == 1).await;

    server.broadcast(&chat_message(42, "Dave"));
    eventually("delivery after restart", || received.lock().len() == 1).await;

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_concurrent_senders_arrive_intact() {
    let (server, platform) = start_hub().await;
    let client = Arc::new(connect_agent(server.local_addr()).await);
    eventually("login", || server.authenticated_count() == 1).await;

    let mut tasks = Vec::new();
    for sender in 0..2u64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..100 {
                let body = format!("{}-{}-{}", sender, i, "x".repeat(500));
                client.send_message(sender, &body).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    eventually("all messages", || platform.messages.lock().len() == 200).await;

    let messages = platform.messages.lock();
    for sender in 0..2u64 {
        let order: Vec<usize> = messages
            .iter()
            .filter(|(channel, _)| *channel == sender)
            .map(|(_, body)| {
                let mut parts = body.splitn(3, '-');
                assert_eq!(parts.next(), Some(sender.to_string().as_str()));
                let i = parts.next().unwrap().parse().unwrap();
                assert_eq!(parts.next().unwrap().len(), 500);
                i
            })
            .collect();
        // One caller's frames keep their order
        assert_eq!(order, (0..100).collect::<Vec<_>>());
    }
    drop(messages);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_command_before_login_changes_nothing() {
    let (server, platform) = start_hub().await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    let subscribe = Command::SubscribeChannel {
        channel_ids: vec![10],
    };
    stream.write_all(&subscribe.encode().unwrap()).await.unwrap();
    let send = Command::SendChannel {
        channel_id: 10,
        message: "early".to_string(),
    };
    let _ = stream.write_all(&send.encode().unwrap()).await;

    let mut buf = [0u8; 16];
    let n = timeout(STEP, stream.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0);

    assert_eq!(server.subscriber_count(10), 0);
    assert_eq!(server.broadcast(&chat_message(10, "Eve")), 0);
    assert!(platform.messages.lock().is_empty());

    server.close().await;
}

// ============================================================================
// Scripted hub: exact frames sent by the agent
// ============================================================================

#[tokio::test]
async fn test_login_precedes_everything() {
    let hub = ScriptedHub::bind().await;
    let client = connect_agent(hub.addr()).await;
    let mut peer = hub.accept().await;

    client.send_message(3, "after login").unwrap();

    peer.expect_login().await;
    assert_eq!(
        peer.expect().await,
        Command::SendChannel {
            channel_id: 3,
            message: "after login".to_string(),
        }
    );

    client.close().await;
}

#[tokio::test]
async fn test_subscription_deltas_only_for_first_and_last_handler() {
    let hub = ScriptedHub::bind().await;
    let client = connect_agent(hub.addr()).await;
    let mut peer = hub.accept().await;
    peer.expect_login().await;

    let (a, _) = recording_handler();
    let (b, _) = recording_handler();
    client.register_message_handler(&a, &[10]);
    client.register_message_handler(&b, &[10]);
    client.unregister_message_handler(&a);
    client.unregister_message_handler(&b);
    client.send_message(0, "end").unwrap();

    assert_eq!(
        peer.expect().await,
        Command::SubscribeChannel {
            channel_ids: vec![10]
        }
    );
    assert_eq!(
        peer.expect().await,
        Command::UnsubscribeChannel {
            channel_ids: vec![10]
        }
    );
    assert!(matches!(peer.expect().await, Command::SendChannel { .. }));

    client.close().await;
}

#[tokio::test]
async fn test_reconnect_resyncs_full_subscription_set() {
    let hub = ScriptedHub::bind().await;
    let client = connect_agent(hub.addr()).await;
    let mut peer = hub.accept().await;
    peer.expect_login().await;

    let (a, _) = recording_handler();
    let (b, _) = recording_handler();
    client.register_message_handler(&a, &[1]);
    client.register_message_handler(&a, &[2, 3]);
    client.register_message_handler(&b, &[3, 4]);
    client.register_message_handler(&b, &[5]);
    client.unsubscribe_channels(&b, &[5]);

    for _ in 0..5 {
        assert!(peer.expect().await.name().ends_with("Channel"));
    }

    // Simulated disconnect
    drop(peer);

    let mut peer = hub.accept().await;
    peer.expect_login().await;
    assert_eq!(
        peer.expect().await,
        Command::SubscribeChannel {
            channel_ids: vec![1, 2, 3, 4]
        }
    );

    client.close().await;
}

#[tokio::test]
async fn test_failed_reconnects_keep_retrying() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let client = ClientBuilder::new(addr.clone(), SECRET)
        .reconnect_delay(Duration::from_millis(20))
        .connect()
        .await;

    // Several attempts are refused before the hub shows up
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_connected());

    let (handler, _) = recording_handler();
    client.register_message_handler(&handler, &[8, 7]);

    let hub = ScriptedHub::bind_to(&addr).await;
    let mut peer = hub.accept().await;
    peer.expect_login().await;
    assert_eq!(
        peer.expect().await,
        Command::SubscribeChannel {
            channel_ids: vec![7, 8]
        }
    );
    eventually("agent connected", || client.is_connected()).await;

    client.close().await;
}

#[tokio::test]
async fn test_exit_from_hub_triggers_reconnect() {
    let hub = ScriptedHub::bind().await;
    let client = connect_agent(hub.addr()).await;
    let mut peer = hub.accept().await;
    peer.expect_login().await;

    peer.send(&Command::Exit.encode().unwrap()).await;
    assert_eq!(peer.next().await, None);

    let mut peer = hub.accept().await;
    peer.expect_login().await;

    client.close().await;
}

#[tokio::test]
async fn test_corrupt_length_drops_link_without_dispatch() {
    let hub = ScriptedHub::bind().await;
    let client = connect_agent(hub.addr()).await;
    let mut peer = hub.accept().await;
    peer.expect_login().await;

    let (handler, received) = recording_handler();
    client.register_message_handler(&handler, &[20]);
    assert!(matches!(
        peer.expect().await,
        Command::SubscribeChannel { .. }
    ));

    // Valid-looking notification preceded by an impossible length
    let mut bytes = 5u32.to_be_bytes().to_vec();
    bytes.extend_from_slice(
        &Command::OnMessage(chat_message(20, "Mallory"))
            .encode()
            .unwrap(),
    );
    peer.send(&bytes).await;

    assert_eq!(peer.next().await, None);
    assert!(received.lock().is_empty());

    // The agent comes back on its own
    let mut peer = hub.accept().await;
    peer.expect_login().await;

    client.close().await;
}

#[tokio::test]
async fn test_unknown_channel_notification_is_dropped() {
    let hub = ScriptedHub::bind().await;
    let client = connect_agent(hub.addr()).await;
    let mut peer = hub.accept().await;
    peer.expect_login().await;

    let (handler, received) = recording_handler();
    client.register_message_handler(&handler, &[1]);
    peer.expect().await;

    peer.send(&Command::OnMessage(chat_message(2, "nobody")).encode().unwrap())
        .await;
    peer.send(&Command::OnMessage(chat_message(1, "somebody")).encode().unwrap())
        .await;

    eventually("delivery", || received.lock().len() == 1).await;
    assert_eq!(received.lock()[0].author_name, "somebody");
    assert!(client.is_connected());

    client.close().await;
}

#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    let hub = ScriptedHub::bind().await;
    let client = ClientBuilder::new(hub.addr(), SECRET)
        .reconnect_delay(Duration::from_millis(200))
        .connect()
        .await;
    let peer = hub.accept().await;

    drop(peer);
    eventually("reconnect scheduled", || client.is_reconnect_pending()).await;

    client.close().await;
    assert!(!client.is_reconnect_pending());

    let accepted = timeout(Duration::from_millis(600), hub.listener.accept()).await;
    assert!(accepted.is_err(), "closed client reconnected");
}

#[tokio::test]
async fn test_oversized_write_reports_backpressure() {
    let hub = ScriptedHub::bind().await;
    let client = ClientBuilder::new(hub.addr(), SECRET)
        .max_pending_bytes(128)
        .connect()
        .await;
    let mut peer = hub.accept().await;
    peer.expect_login().await;

    let result = client.send_message(1, &"x".repeat(512));
    assert!(matches!(result, Err(LinkError::Backpressure)));

    // Smaller frames still fit
    client.send_message(1, "ok").unwrap();
    assert!(matches!(peer.expect().await, Command::SendChannel { .. }));

    client.close().await;
}
