//! The consume contract implemented by message subscribers.

use crate::message::Message;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a handler that rejected or failed to process a message.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct HandlerError {
    reason: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Create a handler error from a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the failure reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A consumer of messages.
///
/// Handlers are attached to subscribable channels by reference; the channel
/// never owns them. A handler either accepts the message (`Ok`) or declines
/// it with an error, in which case the dispatcher decides whether to fail
/// over to another handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Consume a message.
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Adapt an async closure into a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self.f)(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_handler_fn_invocation() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler = handler_fn(move |_msg| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.handle(Message::new("x")).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_error_chain() {
        let err = HandlerError::new("downstream unavailable")
            .with_source(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.reason(), "downstream unavailable");
        assert!(std::error::Error::source(&err).is_some());
    }
}
