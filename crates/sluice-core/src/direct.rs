//! Synchronous point-to-point channel.

use crate::channel::{MessageChannel, SubscribableChannel, Timeout};
use crate::dispatch::{LoadBalancing, UnicastDispatcher};
use crate::error::ChannelError;
use crate::handler::MessageHandler;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;

/// A channel that dispatches each message to exactly one handler on the
/// sender's own task.
///
/// No queue, no scheduling indirection: the handler runs inside the
/// caller's `send` await, so errors propagate with the caller's stack and
/// backpressure is the caller itself. The timeout parameter is accepted for
/// interface uniformity only; delivery is always immediate.
pub struct DirectChannel {
    name: String,
    dispatcher: UnicastDispatcher,
}

impl DirectChannel {
    /// Create a direct channel with round-robin balancing and failover.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dispatcher: UnicastDispatcher::new(name.clone()),
            name,
        }
    }

    /// Replace the load-balancing strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: LoadBalancing) -> Self {
        self.dispatcher = self.dispatcher.with_strategy(strategy);
        self
    }

    /// Enable or disable failover across subscribed handlers.
    #[must_use]
    pub fn with_failover(mut self, failover: bool) -> Self {
        self.dispatcher = self.dispatcher.with_failover(failover);
        self
    }
}

#[async_trait]
impl MessageChannel for DirectChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_timeout(
        &self,
        message: Message,
        _timeout: Timeout,
    ) -> Result<bool, ChannelError> {
        self.dispatcher.dispatch(message).await?;
        Ok(true)
    }
}

impl SubscribableChannel for DirectChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<(), ChannelError> {
        self.dispatcher.add_handler(handler);
        Ok(())
    }

    fn unsubscribe(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        self.dispatcher.remove_handler(handler)
    }

    fn subscriber_count(&self) -> usize {
        self.dispatcher.handler_count()
    }
}
