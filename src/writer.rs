//! Dedicated writer task for one connection.
//!
//! Producers never touch the socket. They hand complete frames to a
//! [`WriterHandle`], which accounts their bytes against the pending cap and
//! queues them on an mpsc channel. The writer task drains the queue in FIFO
//! order, batching whatever is ready into a single vectored write.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► WriterHandle (byte cap) ─► mpsc ─► Writer Task ─► Socket
//! Caller N ─┘
//! ```
//!
//! Every queued item is one whole frame, so concurrent callers can never
//! interleave bytes inside a frame.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backpressure::{PendingBytes, DEFAULT_MAX_PENDING_BYTES};
use crate::error::{LinkError, Result};

/// Default transmit chunk: bytes collected into one write.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 64 * 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_FRAMES: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Cap on bytes queued but not yet written.
    pub max_pending_bytes: usize,
    /// Bytes collected into one write before flushing.
    pub max_batch_bytes: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

/// Handle for queueing frames on the writer task.
///
/// This is cheaply cloneable and never awaits.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::UnboundedSender<Bytes>,
    /// Queued byte count (for backpressure).
    pending: PendingBytes,
}

impl WriterHandle {
    /// Queue one encoded frame.
    ///
    /// Returns `Err(Backpressure)` if the pending cap would be exceeded and
    /// `Err(ConnectionClosed)` if the writer task has stopped.
    pub fn try_send(&self, frame: Bytes) -> Result<()> {
        let len = frame.len();
        self.pending.try_reserve(len)?;

        self.tx.send(frame).map_err(|_| {
            self.pending.release(len);
            LinkError::ConnectionClosed
        })
    }

    /// Bytes queued but not yet written.
    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.pending.pending()
    }

    /// Whether the writer task has stopped receiving.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queueing frames.
///
/// The task exits when `shutdown` turns `true` (or its sender is dropped),
/// when every handle is dropped, or on the first write error. Frames still
/// queued at that point are discarded.
pub fn spawn_writer_task<W>(
    writer: W,
    config: &WriterConfig,
    shutdown: watch::Receiver<bool>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = PendingBytes::new(config.max_pending_bytes);

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(writer_loop(
        rx,
        writer,
        pending,
        config.max_batch_bytes,
        shutdown,
    ));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the socket.
async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut writer: W,
    pending: PendingBytes,
    max_batch_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        // Wait for first frame or shutdown
        let first = tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => return Ok(()),
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };

        // Collect additional ready frames up to one transmit chunk
        let mut batch_bytes = first.len();
        let mut batch = Vec::with_capacity(MAX_BATCH_FRAMES);
        batch.push(first);

        while batch.len() < MAX_BATCH_FRAMES && batch_bytes < max_batch_bytes {
            match rx.try_recv() {
                Ok(frame) => {
                    batch_bytes += frame.len();
                    batch.push(frame);
                }
                Err(_) => break,
            }
        }

        let result = tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => return Ok(()),
            result = write_batch(&mut writer, &batch) => result,
        };

        pending.release(batch_bytes);
        result?;
    }
}

/// Resolve once `shutdown` turns `true` or its sender is dropped.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
///
/// Partial writes are retried until every byte of the batch is out.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after `skip_bytes` were written.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.len();
        if skip_bytes < end {
            let start_in_frame = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame[start_in_frame..]));
        }
        offset = end;
    }

    slices
}
