//! Channel capability traits and the blocking-policy type.
//!
//! Channels are named conduits carrying [`Message`]s. Every channel can
//! send; buffered channels can also be polled, and dispatching channels
//! accept handler subscriptions.

use crate::error::ChannelError;
use crate::handler::MessageHandler;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.starts_with('$') {
        return Err("Channel names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// How long a blocking operation may wait.
///
/// The signed-milliseconds convention at the API boundary maps onto this:
/// negative blocks forever, zero attempts once without waiting, positive
/// waits up to the given duration. Expiry is reported as `false` (send) or
/// `None` (receive), never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the operation can proceed.
    Infinite,
    /// A single non-blocking attempt.
    Immediate,
    /// Wait up to the given duration.
    Bounded(Duration),
}

impl Timeout {
    /// Convert a signed millisecond count into a timeout.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            m if m < 0 => Self::Infinite,
            0 => Self::Immediate,
            m => Self::Bounded(Duration::from_millis(m as u64)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Bounded(d)
    }
}

/// A named conduit accepting messages.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &str;

    /// Send a message, waiting at most `timeout` for capacity.
    ///
    /// Returns `Ok(true)` when the message was accepted, `Ok(false)` when
    /// the timeout expired without acceptance. A `false` result means "not
    /// delivered, safe to retry"; errors are reserved for misconfiguration
    /// and downstream delivery failure.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] when delivery fails for a reason other
    /// than running out of time.
    async fn send_timeout(&self, message: Message, timeout: Timeout)
        -> Result<bool, ChannelError>;

    /// Send a message, waiting indefinitely for capacity.
    ///
    /// # Errors
    ///
    /// Same as [`MessageChannel::send_timeout`].
    async fn send(&self, message: Message) -> Result<bool, ChannelError> {
        self.send_timeout(message, Timeout::Infinite).await
    }
}

/// A channel whose messages are pulled by consumers rather than dispatched.
#[async_trait]
pub trait PollableChannel: MessageChannel {
    /// Receive the next message, waiting at most `timeout` for one to
    /// arrive. Returns `None` when the timeout expires on an empty buffer.
    async fn receive_timeout(&self, timeout: Timeout) -> Option<Message>;

    /// Receive the next message, waiting indefinitely.
    async fn receive(&self) -> Option<Message> {
        self.receive_timeout(Timeout::Infinite).await
    }

    /// Atomically drain and return all buffered messages, in queue order,
    /// without invoking any handler.
    fn clear(&self) -> Vec<Message>;

    /// Atomically remove and return the messages the predicate rejects,
    /// leaving accepted messages in their original relative order.
    fn purge(&self, predicate: &(dyn Fn(&Message) -> bool + Sync)) -> Vec<Message>;
}

/// A channel that dispatches to subscribed handlers.
pub trait SubscribableChannel: MessageChannel {
    /// Attach a handler. Handlers are invoked in subscription order by
    /// broadcast dispatch and selected by the load-balancing strategy for
    /// unicast dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::IllegalState`] when the channel no longer
    /// accepts subscriptions (pool-backed channels after their first send).
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<(), ChannelError>;

    /// Detach a previously attached handler, compared by pointer identity.
    /// Returns `true` if the handler was subscribed.
    fn unsubscribe(&self, handler: &Arc<dyn MessageHandler>) -> bool;

    /// Get the number of subscribed handlers.
    fn subscriber_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("valid:channel").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("$system").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(Timeout::from_millis(-1), Timeout::Infinite);
        assert_eq!(Timeout::from_millis(0), Timeout::Immediate);
        assert_eq!(
            Timeout::from_millis(250),
            Timeout::Bounded(Duration::from_millis(250))
        );
    }
}
