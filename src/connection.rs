//! Connection engine shared by both roles.
//!
//! A [`Connection`] drives one socket with two concurrently running units:
//! the read loop, which decodes frames and hands them to a [`FrameHandler`]
//! in arrival order, and the writer task from [`crate::writer`]. A third
//! supervisor task joins both, releases the socket, moves the state to
//! [`ConnectionState::Closed`] and reports the [`CloseReason`].
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --init--> Active --(EOF | error | exit | shutdown)--> Closing
//!                           ^                                           |
//!                           +---- init (initiator only) <-- Closed <----+
//! ```
//!
//! Closing is signalled, never joined by the loops themselves, so any loop or
//! callback may call [`Connection::shutdown`] without deadlocking.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::protocol::{commands, Frame, FrameBuffer};
use crate::writer::{shutdown_signalled, spawn_writer_task, WriterConfig, WriterHandle};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Which side of the link a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens the connection and logs in; reinitialized after every close.
    Initiator,
    /// Accepted from a listener; never reinitialized.
    Acceptor,
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created but never initialized.
    Uninitialized,
    /// Both loops running; writes accepted.
    Active,
    /// Close signalled; loops are winding down.
    Closing,
    /// Both loops joined and the socket released.
    Closed,
}

/// Why a connection generation ended. The first recorded cause wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its side of the socket.
    PeerClosed,
    /// Peer sent `exit`.
    ExitCommand,
    /// Local [`Connection::shutdown`] or [`Connection::close`].
    Shutdown,
    /// I/O failure, corrupt frame or protocol violation.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::ExitCommand => f.write_str("exit command"),
            CloseReason::Shutdown => f.write_str("shutdown"),
            CloseReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Role-specific session logic driven by the read loop.
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle one inbound frame. `exit` never reaches this method.
    ///
    /// Returning an error terminates the connection.
    fn handle_frame(&self, frame: Frame) -> Result<()>;

    /// Called once per generation after the connection reached `Closed`.
    fn on_closed(&self, _reason: &CloseReason) {}
}

/// Close signal and first-cause record for one generation.
struct CloseSignal {
    tx: watch::Sender<bool>,
    reason: Mutex<Option<CloseReason>>,
}

impl CloseSignal {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            reason: Mutex::new(None),
        }
    }

    /// Record `reason` if none is recorded yet and raise the signal.
    /// Returns `true` for the first caller.
    fn trigger(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.tx.send_replace(true);
        true
    }

    fn is_triggered(&self) -> bool {
        self.reason.lock().is_some()
    }

    fn reason(&self) -> CloseReason {
        self.reason.lock().clone().unwrap_or(CloseReason::Shutdown)
    }
}

/// Live half of one generation.
struct Io {
    writer: WriterHandle,
    signal: Arc<CloseSignal>,
}

struct ConnectionInner {
    role: Role,
    writer_config: WriterConfig,
    state: watch::Sender<ConnectionState>,
    io: Mutex<Option<Io>>,
}

/// One socket, one read loop, one writer task.
///
/// Cheaply cloneable; clones share the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Create an uninitialized connection.
    pub fn new(role: Role, writer_config: WriterConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            inner: Arc::new(ConnectionInner {
                role,
                writer_config,
                state,
                io: Mutex::new(None),
            }),
        }
    }

    /// Role this connection was created for.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether writes are currently accepted.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Bytes queued on the current generation but not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.inner
            .io
            .lock()
            .as_ref()
            .map(|io| io.writer.pending_bytes())
            .unwrap_or(0)
    }

    /// Start a generation on `stream`.
    ///
    /// `preamble` frames are queued before the connection becomes writable by
    /// anyone else, so they always precede other traffic. Only an initiator
    /// connection may be reinitialized once `Closed`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init<S, H>(&self, stream: S, handler: Arc<H>, preamble: Vec<Bytes>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: FrameHandler,
    {
        let mut io = self.inner.io.lock();

        match (self.state(), self.role()) {
            (ConnectionState::Uninitialized, _) => {}
            (ConnectionState::Closed, Role::Initiator) => {}
            (ConnectionState::Closed, Role::Acceptor) => {
                return Err(LinkError::InvalidState(
                    "acceptor connections are never reinitialized".to_string(),
                ));
            }
            (state, _) => {
                return Err(LinkError::InvalidState(format!(
                    "cannot init a connection in state {:?}",
                    state
                )));
            }
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let signal = Arc::new(CloseSignal::new());
        let (writer, writer_task) =
            spawn_writer_task(write_half, &self.inner.writer_config, signal.tx.subscribe());

        for frame in preamble {
            if let Err(e) = writer.try_send(frame) {
                signal.trigger(CloseReason::Shutdown);
                return Err(e);
            }
        }

        *io = Some(Io {
            writer,
            signal: signal.clone(),
        });
        self.inner.state.send_replace(ConnectionState::Active);
        drop(io);

        let reader_task = {
            let conn = self.clone();
            let signal = signal.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let reason = read_loop(read_half, &*handler, signal.tx.subscribe()).await;
                conn.begin_close(&signal, reason);
            })
        };

        let conn = self.clone();
        tokio::spawn(async move {
            let writer_side = async {
                let reason = match writer_task.await {
                    Ok(Ok(())) => CloseReason::Shutdown,
                    Ok(Err(e)) => CloseReason::Error(e.to_string()),
                    Err(e) => CloseReason::Error(format!("writer task failed: {}", e)),
                };
                conn.begin_close(&signal, reason);
            };
            let reader_side = async {
                if let Err(e) = reader_task.await {
                    conn.begin_close(&signal, CloseReason::Error(format!("reader task failed: {}", e)));
                }
            };
            tokio::join!(writer_side, reader_side);

            let reason = signal.reason();
            conn.finish_close(&signal);
            debug!(role = ?conn.role(), %reason, "connection closed");
            handler.on_closed(&reason);
        });

        Ok(())
    }

    /// Queue an encoded frame for sending.
    ///
    /// Never awaits. Fails with `ConnectionClosed` unless the connection is
    /// `Active`, or with `Backpressure` if the pending buffer is full.
    pub fn write(&self, frame: Bytes) -> Result<()> {
        let io = self.inner.io.lock();
        match io.as_ref() {
            Some(io) if !io.signal.is_triggered() && !io.writer.is_closed() => {
                io.writer.try_send(frame)
            }
            _ => Err(LinkError::ConnectionClosed),
        }
    }

    /// Signal the current generation to close. Idempotent and non-blocking.
    pub fn shutdown(&self) {
        let signal = self.inner.io.lock().as_ref().map(|io| io.signal.clone());
        if let Some(signal) = signal {
            self.begin_close(&signal, CloseReason::Shutdown);
        }
    }

    /// Signal a close and wait until the connection is no longer running.
    ///
    /// Must not be awaited from a [`FrameHandler`] callback; use
    /// [`Connection::shutdown`] there.
    pub async fn close(&self) {
        self.shutdown();
        self.wait_closed().await;
    }

    /// Wait until the current generation (if any) has fully terminated.
    pub async fn wait_closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx
            .wait_for(|state| {
                matches!(
                    state,
                    ConnectionState::Uninitialized | ConnectionState::Closed
                )
            })
            .await;
    }

    fn begin_close(&self, signal: &CloseSignal, reason: CloseReason) {
        if !signal.trigger(reason.clone()) {
            return;
        }
        match &reason {
            CloseReason::Error(e) => warn!(role = ?self.role(), error = %e, "closing connection"),
            _ => debug!(role = ?self.role(), %reason, "closing connection"),
        }
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Active {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
    }

    fn finish_close(&self, signal: &Arc<CloseSignal>) {
        let mut io = self.inner.io.lock();
        let current = io
            .as_ref()
            .map(|io| Arc::ptr_eq(&io.signal, signal))
            .unwrap_or(false);
        if current {
            *io = None;
            self.inner.state.send_replace(ConnectionState::Closed);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role())
            .field("state", &self.state())
            .finish()
    }
}

/// Read frames until EOF, corruption, `exit`, a handler error or shutdown.
async fn read_loop<R, H>(
    mut reader: R,
    handler: &H,
    mut shutdown: watch::Receiver<bool>,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    H: FrameHandler + ?Sized,
{
    let mut frame_buffer = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => return CloseReason::Shutdown,
            read = reader.read(&mut buf) => match read {
                Ok(0) => return CloseReason::PeerClosed,
                Ok(n) => n,
                Err(e) => return CloseReason::Error(e.to_string()),
            },
        };

        frame_buffer.extend(&buf[..n]);

        // Frames ahead of a corrupt length are dispatched before it closes
        loop {
            let frame = match frame_buffer.decode_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return CloseReason::Error(e.to_string()),
            };
            if *shutdown.borrow() {
                return CloseReason::Shutdown;
            }
            if frame.command() == commands::EXIT {
                return CloseReason::ExitCommand;
            }
            if let Err(e) = handler.handle_frame(frame) {
                return CloseReason::Error(e.to_string());
            }
        }
    }
}
