//! Bulk drain-and-refill utility for pollable channels.

use crate::channel::{MessageChannel, PollableChannel, Timeout};
use crate::error::ChannelError;
use crate::message::Message;
use std::sync::Arc;
use tracing::{debug, warn};

/// Drains pollable channels, collecting the messages a predicate accepts
/// and returning the rest to their channel.
pub struct ChannelPurger {
    channels: Vec<Arc<dyn PollableChannel>>,
}

impl ChannelPurger {
    /// Create a purger over the given channels.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::IllegalArgument`] when no channel is given.
    pub fn new(channels: Vec<Arc<dyn PollableChannel>>) -> Result<Self, ChannelError> {
        if channels.is_empty() {
            return Err(ChannelError::IllegalArgument(
                "purger requires at least one channel".into(),
            ));
        }
        Ok(Self { channels })
    }

    /// Drain every channel completely, returning all messages in channel
    /// argument order.
    pub async fn purge(&self) -> Vec<Message> {
        self.purge_with(&|_| true).await
    }

    /// Drain every channel, collecting accepted messages into the result.
    ///
    /// Rejected messages are sent back to their channel in their original
    /// relative order. Channels are processed in argument order, each via
    /// repeated non-blocking receives until empty.
    pub async fn purge_with(
        &self,
        predicate: &(dyn Fn(&Message) -> bool + Sync),
    ) -> Vec<Message> {
        let mut collected = Vec::new();
        for channel in &self.channels {
            let mut rejected = Vec::new();
            while let Some(message) = channel.receive_timeout(Timeout::Immediate).await {
                if predicate(&message) {
                    collected.push(message);
                } else {
                    rejected.push(message);
                }
            }
            debug!(
                channel = channel.name(),
                collected = collected.len(),
                returned = rejected.len(),
                "Purged channel"
            );
            for message in rejected {
                let message_id = message.id();
                match channel.send(message).await {
                    Ok(true) => {}
                    Ok(false) | Err(_) => {
                        warn!(
                            channel = channel.name(),
                            message_id,
                            "Failed to return rejected message after purge"
                        );
                    }
                }
            }
        }
        collected
    }
}
