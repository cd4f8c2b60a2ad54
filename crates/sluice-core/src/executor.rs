//! Asynchronous point-to-point channel backed by a worker pool.

use crate::channel::{MessageChannel, SubscribableChannel, Timeout};
use crate::dispatch::{route_failure, LoadBalancing, UnicastDispatcher};
use crate::error::ChannelError;
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::pool::TaskPool;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A channel whose unicast dispatch runs on a worker pool.
///
/// `send` returns as soon as the pool admits the dispatch task; the handler
/// is invoked on a pool task strictly after `send` returns. The send
/// timeout bounds only the admission wait. Handler failures never reach the
/// sender: they are routed to the configured error channel, or logged.
///
/// The first send marks the channel initialized; subscriptions are only
/// accepted before that point, which closes the race between wiring and the
/// first in-flight dispatch.
pub struct ExecutorChannel {
    name: String,
    dispatcher: Arc<UnicastDispatcher>,
    strategy: LoadBalancing,
    failover: bool,
    pool: TaskPool,
    error_channel: Option<Arc<dyn MessageChannel>>,
    initialized: AtomicBool,
}

impl ExecutorChannel {
    /// Create an executor channel over the given pool.
    #[must_use]
    pub fn new(name: impl Into<String>, pool: TaskPool) -> Self {
        let name = name.into();
        Self {
            dispatcher: Arc::new(UnicastDispatcher::new(name.clone())),
            name,
            strategy: LoadBalancing::default(),
            failover: true,
            pool,
            error_channel: None,
            initialized: AtomicBool::new(false),
        }
    }

    /// Replace the load-balancing strategy. Configure before subscribing:
    /// the dispatcher is rebuilt and any attached handlers are dropped.
    #[must_use]
    pub fn with_strategy(mut self, strategy: LoadBalancing) -> Self {
        self.strategy = strategy;
        self.rebuild_dispatcher();
        self
    }

    /// Enable or disable failover across subscribed handlers. Configure
    /// before subscribing: the dispatcher is rebuilt and any attached
    /// handlers are dropped.
    #[must_use]
    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self.rebuild_dispatcher();
        self
    }

    fn rebuild_dispatcher(&mut self) {
        self.dispatcher = Arc::new(
            UnicastDispatcher::new(self.name.clone())
                .with_strategy(self.strategy.clone())
                .with_failover(self.failover),
        );
    }

    /// Route dispatch failures to the given channel instead of the log.
    #[must_use]
    pub fn with_error_channel(mut self, error_channel: Arc<dyn MessageChannel>) -> Self {
        self.error_channel = Some(error_channel);
        self
    }

    /// Whether the channel has seen its first send.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MessageChannel for ExecutorChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_timeout(
        &self,
        message: Message,
        timeout: Timeout,
    ) -> Result<bool, ChannelError> {
        self.initialized.store(true, Ordering::Release);

        let dispatcher = Arc::clone(&self.dispatcher);
        let error_channel = self.error_channel.clone();
        let channel = self.name.clone();
        self.pool
            .spawn(timeout, async move {
                if let Err(e) = dispatcher.dispatch(message.clone()).await {
                    route_failure(&channel, error_channel.as_deref(), message, e.to_string())
                        .await;
                }
            })
            .await?;
        Ok(true)
    }
}

impl SubscribableChannel for ExecutorChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<(), ChannelError> {
        if self.initialized.load(Ordering::Acquire) {
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
    use crate::channel::PollableChannel;
    use crate::handler::{handler_fn, HandlerError};
    use crate::queue::QueueChannel;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_returns_before_delivery() {
        let channel = ExecutorChannel::new("orders", TaskPool::bounded(2).unwrap());
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        channel
            .subscribe(handler_fn(move |_msg| {
                let tx = tx.lock().unwrap().take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(());
                    }
                    Ok(())
                }
            }))
            .unwrap();

        assert!(channel.send(Message::new("m")).await.unwrap());
        // Delivery happens strictly after send returned.
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("handler never ran")
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_after_first_send_is_illegal() {
        let channel = ExecutorChannel::new("orders", TaskPool::unbounded());
        channel.subscribe(handler_fn(|_msg| async { Ok(()) })).unwrap();
        assert!(channel.send(Message::new("m")).await.unwrap());

        let result = channel.subscribe(handler_fn(|_msg| async { Ok(()) }));
        assert!(matches!(result, Err(ChannelError::IllegalState(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handler_failure_routed_to_error_channel() {
        let errors = Arc::new(QueueChannel::new("errors"));
        let channel = ExecutorChannel::new("orders", TaskPool::unbounded())
            .with_error_channel(Arc::clone(&errors) as Arc<dyn MessageChannel>);
        channel
            .subscribe(handler_fn(|_msg| async {
                Err(HandlerError::new("downstream gone"))
            }))
            .unwrap();

        let original = Message::new("m");
        let original_id = original.id();
        assert!(channel.send(original).await.unwrap());

        let envelope = tokio::time::timeout(Duration::from_secs(1), errors.receive())
            .await
            .expect("no failure envelope")
            .expect("error channel closed");
        let failure = envelope
            .payload_ref::<crate::error::FailedDelivery>()
            .expect("envelope payload");
        assert_eq!(failure.original.id(), original_id);
        assert!(failure.reason.contains("failed after trying all handlers"));
    }

    #[tokio::test]
    async fn test_saturated_pool_rejects_send() {
        let channel = ExecutorChannel::new("orders", TaskPool::bounded(1).unwrap());
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let gate_h = Arc::clone(&gate);
        channel
            .subscribe(handler_fn(move |_msg| {
                let gate = Arc::clone(&gate_h);
                async move {
                    let _permit = gate.acquire().await;
                    Ok(())
                }
            }))
            .unwrap();

        // First task occupies the only pool slot.
        assert!(channel.send(Message::new("a")).await.unwrap());
        let result = channel
            .send_timeout(Message::new("b"), Timeout::Immediate)
            .await;
        assert!(matches!(result, Err(ChannelError::DispatchRejected(_))));

        gate.add_permits(1);
    }

    #[tokio::test]
    async fn test_dispatch_runs_in_subscription_order_counter() {
        let channel = ExecutorChannel::new("orders", TaskPool::unbounded());
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        channel
            .subscribe(handler_fn(move |_msg| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
            .unwrap();

        for _ in 0..5 {
            assert!(channel.send(Message::new("m")).await.unwrap());
        }
        for _ in 0..200 {
            if delivered.load(Ordering::SeqCst) == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 5);
    }
}
