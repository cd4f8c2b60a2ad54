//! Delivery failure taxonomy.
//!
//! Timeout expiry is deliberately absent: a send that runs out of time
//! returns `Ok(false)` and a receive returns `None`, keeping the hot path
//! allocation-free. Errors are reserved for misconfiguration and genuine
//! delivery failure.

use crate::handler::HandlerError;
use crate::message::{Message, MessageId};
use thiserror::Error;

/// Errors raised by channels and dispatchers.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Dispatch was attempted with zero subscribed handlers.
    #[error("channel '{0}' has no subscribers")]
    NoSubscribers(String),

    /// Every eligible handler declined or failed the message.
    #[error("dispatch of message {message_id} failed after trying all handlers")]
    DispatchFailed {
        /// ID of the undeliverable message.
        message_id: MessageId,
        /// The last handler failure, if any handler reported one.
        #[source]
        source: Option<HandlerError>,
    },

    /// A broadcast aborted partway through its subscriber list.
    #[error("broadcast aborted after {delivered} successful deliveries")]
    DeliveryFailed {
        /// Number of handlers that accepted the message before the failure.
        delivered: usize,
        /// The handler failure that aborted the broadcast.
        #[source]
        source: HandlerError,
    },

    /// The worker pool refused the dispatch task.
    #[error("dispatch task rejected: {0}")]
    DispatchRejected(String),

    /// The payload type was not accepted and could not be converted.
    #[error("channel '{channel}' expected one of [{expected}], got '{actual}'")]
    DeliveryRejected {
        /// Name of the gating channel.
        channel: String,
        /// Comma-separated accepted type names.
        expected: String,
        /// Concrete type name of the offered payload.
        actual: &'static str,
    },

    /// An operation was attempted in a state that forbids it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Malformed construction or configuration.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

/// Payload of a failure envelope routed to an error channel.
///
/// Asynchronous delivery paths catch handler failures at the task boundary
/// and forward them as a regular message carrying this payload, so the
/// sender is never blocked on a handler fault and the fault is never lost.
#[derive(Debug, Clone)]
pub struct FailedDelivery {
    /// The message that could not be delivered.
    pub original: Message,
    /// Rendered failure cause.
    pub reason: String,
}

impl FailedDelivery {
    /// Wrap a failed message and its rendered cause into an envelope payload.
    #[must_use]
    pub fn new(original: Message, reason: impl Into<String>) -> Self {
        Self {
            original,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::NoSubscribers("orders".into());
        assert_eq!(err.to_string(), "channel 'orders' has no subscribers");

        let err = ChannelError::DeliveryRejected {
            channel: "typed".into(),
            expected: "alloc::string::String".into(),
            actual: "i32",
        };
        assert!(err.to_string().contains("expected one of"));
    }

    #[test]
    fn test_failed_delivery_envelope() {
        let msg = Message::new("payload");
        let err = ChannelError::DispatchFailed {
            message_id: msg.id(),
            source: None,
        };
        let envelope = FailedDelivery::new(msg.clone(), err.to_string());
        assert_eq!(envelope.original.id(), msg.id());
        assert!(envelope.reason.contains("failed after trying all handlers"));
    }
}
