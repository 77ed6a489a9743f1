//! Fixed-delay reconnect scheduling.
//!
//! At most one reconnect is pending at a time; scheduling while one is
//! outstanding is a no-op. The pending task clears its slot before running
//! the attempt, so an attempt that fails may schedule the next one itself.
//! [`ReconnectScheduler::cancel`] aborts the pending delay immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default delay between a disconnect and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

struct Pending {
    id: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
    next_id: u64,
}

/// Single-pending, cancellable reconnect timer.
#[derive(Clone)]
pub struct ReconnectScheduler {
    delay: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl ReconnectScheduler {
    /// Create a scheduler with the given delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `attempt` after the delay unless a reconnect is already pending.
    ///
    /// Returns `true` if a new reconnect was scheduled.
    pub fn schedule<F, Fut>(&self, attempt: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if slot.pending.is_some() {
            return false;
        }

        slot.next_id += 1;
        let id = slot.next_id;
        let delay = self.delay;
        let shared = self.slot.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut slot = shared.lock();
                match &slot.pending {
                    Some(pending) if pending.id == id => slot.pending = None,
                    _ => return,
                }
            }

            attempt().await;
        });

        debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        slot.pending = Some(Pending { id, task });
        true
    }

    /// Cancel the pending reconnect, if any.
    ///
    /// Returns `true` if one was pending.
    pub fn cancel(&self) -> bool {
        match self.slot.lock().pending.take() {
            Some(pending) => {
                pending.task.abort();
                debug!("pending reconnect cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a reconnect is waiting for its delay.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }
}

impl Default for ReconnectScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}
