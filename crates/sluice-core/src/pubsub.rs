//! Publish-subscribe channel: every subscriber sees every message.

use crate::channel::{MessageChannel, SubscribableChannel, Timeout};
use crate::dispatch::BroadcastDispatcher;
use crate::error::ChannelError;
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::pool::TaskPool;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A broadcast channel.
///
/// Without a pool, handlers run sequentially in subscription order on the
/// sender's task and the first failure aborts the remainder. With a pool,
/// each handler invocation is an independent task whose failure is routed
/// to the error channel (or logged) without touching its siblings; `send`
/// returns once every task is admitted, not completed.
pub struct PublishSubscribeChannel {
    name: String,
    dispatcher: BroadcastDispatcher,
    pooled: bool,
    initialized: AtomicBool,
}

impl PublishSubscribeChannel {
    /// Create a synchronous publish-subscribe channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dispatcher: BroadcastDispatcher::new(name.clone()),
            name,
            pooled: false,
            initialized: AtomicBool::new(false),
        }
    }

    /// Run each handler invocation on the given pool.
    ///
    /// Pool-backed channels only accept subscriptions before their first
    /// send.
    #[must_use]
    pub fn with_pool(mut self, pool: TaskPool) -> Self {
        self.dispatcher = self.dispatcher.with_pool(pool);
        self.pooled = true;
        self
    }

    /// Fail sends with [`ChannelError::NoSubscribers`] when nobody is
    /// subscribed, instead of treating the send as a no-op.
    #[must_use]
    pub fn require_subscribers(mut self, required: bool) -> Self {
        self.dispatcher = self.dispatcher.require_subscribers(required);
        self
    }

    /// Route isolated per-handler failures to the given channel.
    #[must_use]
    pub fn with_error_channel(mut self, error_channel: Arc<dyn MessageChannel>) -> Self {
        self.dispatcher = self.dispatcher.with_error_channel(error_channel);
        self
    }
}

#[async_trait]
impl MessageChannel for PublishSubscribeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_timeout(
        &self,
        message: Message,
        timeout: Timeout,
    ) -> Result<bool, ChannelError> {
        self.initialized.store(true, Ordering::Release);
        self.dispatcher.dispatch(message, timeout).await?;
        Ok(true)
    }
}

impl SubscribableChannel for PublishSubscribeChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<(), ChannelError> {
        if self.pooled && self.initialized.load(Ordering::Acquire) {
            return Err(ChannelError::IllegalState(format!(
                "channel '{}' no longer accepts subscriptions after its first send",
                self.name
            )));
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, HandlerError};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let channel = PublishSubscribeChannel::new("events");
        let counters: Vec<Arc<AtomicUsize>> =
            (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        for counter in &counters {
            let counter = Arc::clone(counter);
            channel
                .subscribe(handler_fn(move |_msg| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }))
                .unwrap();
        }

        assert!(channel.send(Message::new("m")).await.unwrap());
        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_empty_send_is_noop_by_default() {
        let channel = PublishSubscribeChannel::new("events");
        assert!(channel.send(Message::new("m")).await.unwrap());

        let strict = PublishSubscribeChannel::new("events").require_subscribers(true);
        let result = strict.send(Message::new("m")).await;
        assert!(matches!(result, Err(ChannelError::NoSubscribers(_))));
    }

    #[tokio::test]
    async fn test_sync_failure_propagates_to_sender() {
        let channel = PublishSubscribeChannel::new("events");
        channel.subscribe(handler_fn(|_msg| async { Ok(()) })).unwrap();
        channel
            .subscribe(handler_fn(|_msg| async {
                Err(HandlerError::new("subscriber crashed"))
            }))
            .unwrap();

        let result = channel.send(Message::new("m")).await;
        match result {
            Err(ChannelError::DeliveryFailed { delivered, .. }) => assert_eq!(delivered, 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unpooled_channel_allows_late_subscription() {
        let channel = PublishSubscribeChannel::new("events");
        assert!(channel.send(Message::new("m")).await.unwrap());
        assert!(channel.subscribe(handler_fn(|_msg| async { Ok(()) })).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pooled_channel_gates_late_subscription() {
        let channel = PublishSubscribeChannel::new("events").with_pool(TaskPool::unbounded());
        channel.subscribe(handler_fn(|_msg| async { Ok(()) })).unwrap();
        assert!(channel.send(Message::new("m")).await.unwrap());

        let result = channel.subscribe(handler_fn(|_msg| async { Ok(()) }));
        assert!(matches!(result, Err(ChannelError::IllegalState(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pooled_fanout_delivers_to_all() {
        let channel = PublishSubscribeChannel::new("events").with_pool(TaskPool::unbounded());
        let delivered = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let delivered = Arc::clone(&delivered);
            channel
                .subscribe(handler_fn(move |_msg| {
                    let delivered = Arc::clone(&delivered);
                    async move {
                        delivered.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }))
                .unwrap();
        }

        assert!(channel.send(Message::new("m")).await.unwrap());
        for _ in 0..200 {
            if delivered.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 4);
    }
}
