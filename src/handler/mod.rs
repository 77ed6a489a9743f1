//! Handler module - inbound message callbacks and subscriptions.
//!
//! Provides:
//! - [`MessageHandler`] - receives `onMessage` notifications
//! - [`SubscriptionRegistry`] - maps channel ids to handlers by identity

mod registry;

pub use registry::SubscriptionRegistry;

use crate::protocol::ChannelMessage;

/// Receives chat messages for the channels it is registered for.
///
/// Called on the connection's read loop, one message at a time.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message.
    fn on_message(&self, message: &ChannelMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&ChannelMessage) + Send + Sync + 'static,
{
    fn on_message(&self, message: &ChannelMessage) {
        self(message)
    }
}
