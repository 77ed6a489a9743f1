//! Subscription registry mapping channel ids to message handlers.
//!
//! Membership is by handler identity (`Arc` pointer), not by value, so the
//! same `Arc` registered twice for one channel counts once. Every mutation
//! returns exactly the channel ids whose subscribed/unsubscribed status it
//! changed; these are the deltas the initiator forwards to the hub.
//!
//! The registry itself is not synchronized. The client keeps it behind one
//! mutex held across compute-delta, apply and enqueue.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use relay_link::handler::{MessageHandler, SubscriptionRegistry};
//! use relay_link::protocol::ChannelMessage;
//!
//! let mut registry = SubscriptionRegistry::new();
//! let first: Arc<dyn MessageHandler> = Arc::new(|_msg: &ChannelMessage| {});
//! let second: Arc<dyn MessageHandler> = Arc::new(|_msg: &ChannelMessage| {});
//!
//! assert_eq!(registry.register(&first, &[10, 20]), vec![10, 20]);
//! // 20 is already subscribed, only 30 is new
//! assert_eq!(registry.register(&second, &[20, 30]), vec![30]);
//! // 20 still has `second`
//! assert_eq!(registry.unregister(&first), vec![10]);
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use super::MessageHandler;

/// Channel id → handlers interested in it.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<u64, Vec<Arc<dyn MessageHandler>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` to each of `channels`.
    ///
    /// Returns the channels that had no handler before, in first-seen order.
    pub fn register(&mut self, handler: &Arc<dyn MessageHandler>, channels: &[u64]) -> Vec<u64> {
        let mut added = Vec::new();

        for &channel in channels {
            match self.channels.entry(channel) {
                Entry::Vacant(slot) => {
                    slot.insert(vec![handler.clone()]);
                    added.push(channel);
                }
                Entry::Occupied(mut slot) => {
                    let handlers = slot.get_mut();
                    if !handlers.iter().any(|h| same_handler(h, handler)) {
                        handlers.push(handler.clone());
                    }
                }
            }
        }

        added
    }

    /// Remove `handler` from every channel.
    ///
    /// Returns the channels left without any handler.
    pub fn unregister(&mut self, handler: &Arc<dyn MessageHandler>) -> Vec<u64> {
        let mut abandoned = Vec::new();

        self.channels.retain(|channel, handlers| {
            handlers.retain(|h| !same_handler(h, handler));
            if handlers.is_empty() {
                abandoned.push(*channel);
                false
            } else {
                true
            }
        });

        abandoned.sort_unstable();
        abandoned
    }

    /// Remove `handler` from `channels` only.
    ///
    /// Returns the listed channels left without any handler.
    pub fn unsubscribe(&mut self, handler: &Arc<dyn MessageHandler>, channels: &[u64]) -> Vec<u64> {
        let mut abandoned = Vec::new();

        for &channel in channels {
            if let Entry::Occupied(mut slot) = self.channels.entry(channel) {
                slot.get_mut().retain(|h| !same_handler(h, handler));
                if slot.get().is_empty() {
                    slot.remove();
                    abandoned.push(channel);
                }
            }
        }

        abandoned
    }

    /// Every channel with at least one handler, ascending.
    pub fn channels(&self) -> Vec<u64> {
        let mut channels: Vec<u64> = self.channels.keys().copied().collect();
        channels.sort_unstable();
        channels
    }

    /// Snapshot of the handlers for `channel`.
    ///
    /// Callers invoke the handlers after releasing their lock.
    pub fn handlers_for(&self, channel: u64) -> Vec<Arc<dyn MessageHandler>> {
        self.channels.get(&channel).cloned().unwrap_or_default()
    }

    /// Whether `channel` has at least one handler.
    pub fn is_subscribed(&self, channel: u64) -> bool {
        self.channels.contains_key(&channel)
    }

    /// Number of subscribed channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is subscribed.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Identity comparison ignoring vtable pointers.
fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler() -> Arc<dyn MessageHandler> {
        Arc::new(|_msg: &ChannelMessage| {})
    }

    #[test]
    fn test_register_returns_new_channels_only() {
        let mut registry = SubscriptionRegistry::new();
        let h = handler();

        assert_eq!(registry.register(&h, &[10, 20]), vec![10, 20]);
        assert_eq!(registry.register(&h, &[20, 30]), vec![30]);
        assert_eq!(registry.channels(), vec![10, 20, 30]);
    }

    #[test]
    fn test_same_handler_twice_counts_once() {
        let mut registry = SubscriptionRegistry::new();
        let h = handler();

        registry.register(&h, &[10]);
        registry.register(&h, &[10]);
        assert_eq!(registry.handlers_for(10).len(), 1);

        assert_eq!(registry.unregister(&h), vec![10]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_equal_but_distinct_handlers_both_kept() {
        let mut registry = SubscriptionRegistry::new();
        let a = handler();
        let b = handler();

        registry.register(&a, &[10]);
        assert!(registry.register(&b, &[10]).is_empty());
        assert_eq!(registry.handlers_for(10).len(), 2);
    }

    #[test]
    fn test_shared_channel_survives_one_unregister() {
        let mut registry = SubscriptionRegistry::new();
        let a = handler();
        let b = handler();

        registry.register(&a, &[10, 20]);
        registry.register(&b, &[20]);

        assert_eq!(registry.unregister(&a), vec![10]);
        assert!(registry.is_subscribed(20));
        assert_eq!(registry.unregister(&b), vec![20]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_unknown_handler() {
        let mut registry = SubscriptionRegistry::new();
        let a = handler();
        registry.register(&a, &[10]);

        assert!(registry.unregister(&handler()).is_empty());
        assert!(registry.is_subscribed(10));
    }

    #[test]
    fn test_unsubscribe_subset() {
        let mut registry = SubscriptionRegistry::new();
        let a = handler();
        let b = handler();
        registry.register(&a, &[10, 20, 30]);
        registry.register(&b, &[30]);

        assert_eq!(registry.unsubscribe(&a, &[20, 30, 99]), vec![20]);
        assert_eq!(registry.channels(), vec![10, 30]);
        assert_eq!(registry.handlers_for(30).len(), 1);
    }

    #[test]
    fn test_handlers_for_unknown_channel() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.handlers_for(42).is_empty());
    }

    #[test]
    fn test_snapshot_invokes_each_handler() {
        let mut registry = SubscriptionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            let h: Arc<dyn MessageHandler> = Arc::new(move |_msg: &ChannelMessage| {
                count.fetch_add(1, Ordering::SeqCst);
            });
            registry.register(&h, &[5]);
        }

        let msg = ChannelMessage {
            message_id: 1,
            channel_id: 5,
            author_id: 2,
            author_name: "n".to_string(),
            is_automated: true,
            role_ids: vec![],
            role_color: None,
            content: String::new(),
        };
        for h in registry.handlers_for(5) {
            h.on_message(&msg);
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
