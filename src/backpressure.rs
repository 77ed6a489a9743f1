//! Backpressure accounting for the pending write buffer.
//!
//! Tracks how many bytes are queued for a connection's writer but not yet
//! written to the socket. Producers reserve before enqueueing and the writer
//! releases after each flushed batch. A reservation that would push the total
//! over the cap is refused immediately; callers are never parked waiting for
//! room.
//!
//! # Configuration
//!
//! - `max_pending_bytes`: cap on queued bytes (default: 1,000,000)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{LinkError, Result};

/// Default cap on bytes queued but not yet written.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 1_000_000;

/// Lock-free byte counter shared by producers and the writer task.
#[derive(Debug, Clone)]
pub struct PendingBytes {
    /// Bytes currently queued.
    pending: Arc<AtomicUsize>,
    /// Maximum bytes allowed in the queue.
    max_pending: usize,
}

impl PendingBytes {
    /// Create a counter with the given cap.
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending,
        }
    }

    /// Reserve `len` bytes of queue space.
    ///
    /// Returns `Err(Backpressure)` without reserving anything if the cap would
    /// be exceeded.
    pub fn try_reserve(&self, len: usize) -> Result<()> {
        let max = self.max_pending;
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(len).filter(|next| *next <= max)
            })
            .map(|_| ())
            .map_err(|_| LinkError::Backpressure)
    }

    /// Release `len` bytes after they were written or discarded.
    #[inline]
    pub fn release(&self, len: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(len))
            });
    }

    /// Bytes currently queued.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Configured cap.
    #[inline]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

impl Default for PendingBytes {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        let pending = PendingBytes::new(100);
        assert_eq!(pending.max_pending(), 100);
        assert_eq!(pending.pending(), 0);
    }

    #[test]
    fn test_default_cap() {
        assert_eq!(PendingBytes::default().max_pending(), 1_000_000);
    }

    #[test]
    fn test_reserve_up_to_cap() {
        let pending = PendingBytes::new(100);

        assert!(pending.try_reserve(60).is_ok());
        assert!(pending.try_reserve(40).is_ok());
        assert_eq!(pending.pending(), 100);

        assert!(matches!(
            pending.try_reserve(1),
            Err(LinkError::Backpressure)
        ));
        assert_eq!(pending.pending(), 100);
    }

    #[test]
    fn test_rejected_reservation_reserves_nothing() {
        let pending = PendingBytes::new(100);
        pending.try_reserve(50).unwrap();

        assert!(pending.try_reserve(51).is_err());
        assert_eq!(pending.pending(), 50);
        assert!(pending.try_reserve(50).is_ok());
    }

    #[test]
    fn test_release() {
        let pending = PendingBytes::new(100);
        pending.try_reserve(100).unwrap();

        pending.release(30);
        assert_eq!(pending.pending(), 70);
        assert!(pending.try_reserve(30).is_ok());
    }

    #[test]
    fn test_release_saturates() {
        let pending = PendingBytes::new(100);
        pending.try_reserve(10).unwrap();
        pending.release(50);
        assert_eq!(pending.pending(), 0);
    }

    #[test]
    fn test_clone_shares_counter() {
        let pending = PendingBytes::new(100);
        let clone = pending.clone();

        pending.try_reserve(40).unwrap();
        assert_eq!(clone.pending(), 40);

        clone.release(40);
        assert_eq!(pending.pending(), 0);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_cap() {
        let pending = PendingBytes::new(1000);
        let mut threads = Vec::new();

        for _ in 0..8 {
            let pending = pending.clone();
            threads.push(std::thread::spawn(move || {
                let mut accepted = 0;
                for _ in 0..100 {
                    if pending.try_reserve(7).is_ok() {
                        accepted += 7;
                    }
                }
                accepted
            }));
        }

        let total: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(total, pending.pending());
        assert!(total <= 1000);
    }
}
