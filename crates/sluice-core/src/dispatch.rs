//! Handler-selection and delivery algorithms.
//!
//! Two dispatchers back every subscribable channel: [`UnicastDispatcher`]
//! delivers each message to exactly one handler (load balancing plus
//! optional failover), [`BroadcastDispatcher`] delivers to every handler.
//! Both snapshot the handler list at the start of a dispatch, so the list
//! may be mutated concurrently without affecting in-flight deliveries.

use crate::channel::{MessageChannel, Timeout};
use crate::error::{ChannelError, FailedDelivery};
use crate::handler::MessageHandler;
use crate::message::Message;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace, warn};

use crate::pool::TaskPool;

/// Policy selecting which handler a unicast dispatch tries first.
#[derive(Clone, Default)]
pub enum LoadBalancing {
    /// A shared cursor advances on every dispatch; fairness is best-effort
    /// under concurrent senders.
    #[default]
    RoundRobin,
    /// Always start at the first subscribed handler.
    Fixed,
    /// Caller-supplied start index, reduced modulo the handler count.
    Custom(Arc<dyn Fn(&Message, usize) -> usize + Send + Sync>),
}

impl fmt::Debug for LoadBalancing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => f.write_str("RoundRobin"),
            Self::Fixed => f.write_str("Fixed"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// An ordered, concurrently mutable handler list.
///
/// Reads clone the list under the lock and release it before any handler
/// runs, so subscription changes never contend with an in-flight dispatch.
#[derive(Default)]
struct HandlerList {
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl HandlerList {
    fn add(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn remove(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        handlers.len() < before
    }

    fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Single-delivery dispatcher with load balancing and failover.
pub struct UnicastDispatcher {
    channel: String,
    handlers: HandlerList,
    strategy: LoadBalancing,
    failover: bool,
    cursor: AtomicUsize,
}

impl UnicastDispatcher {
    /// Create a dispatcher for the named channel with round-robin balancing
    /// and failover enabled.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            handlers: HandlerList::default(),
            strategy: LoadBalancing::default(),
            failover: true,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Replace the load-balancing strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: LoadBalancing) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable or disable failover to the next handler on failure.
    #[must_use]
    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    /// Attach a handler at the end of the subscription order.
    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.add(handler);
        debug!(channel = %self.channel, subscribers = self.handlers.len(), "Handler subscribed");
    }

    /// Detach a handler, compared by pointer identity.
    pub fn remove_handler(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        let removed = self.handlers.remove(handler);
        if removed {
            debug!(channel = %self.channel, subscribers = self.handlers.len(), "Handler unsubscribed");
        }
        removed
    }

    /// Get the number of subscribed handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Deliver a message to exactly one handler.
    ///
    /// The first handler to accept wins; further handlers are never tried
    /// after a success. On failure the dispatcher advances to the next
    /// handler when failover is enabled, otherwise fails immediately.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NoSubscribers`] on an empty handler set,
    /// [`ChannelError::DispatchFailed`] when every eligible handler failed.
    pub async fn dispatch(&self, message: Message) -> Result<(), ChannelError> {
        let snapshot = self.handlers.snapshot();
        if snapshot.is_empty() {
            return Err(ChannelError::NoSubscribers(self.channel.clone()));
        }

        // Single subscriber: skip the strategy and the iteration machinery.
        if snapshot.len() == 1 {
            return match snapshot[0].handle(message.clone()).await {
                Ok(()) => Ok(()),
                Err(e) => Err(ChannelError::DispatchFailed {
                    message_id: message.id(),
                    source: Some(e),
                }),
            };
        }

        let count = snapshot.len();
        let start = match &self.strategy {
            LoadBalancing::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % count,
            LoadBalancing::Fixed => 0,
            LoadBalancing::Custom(select) => select(&message, count) % count,
        };

        let mut last_failure = None;
        for offset in 0..count {
            let handler = &snapshot[(start + offset) % count];
            match handler.handle(message.clone()).await {
                Ok(()) => {
                    trace!(channel = %self.channel, message_id = message.id(), "Dispatched");
                    return Ok(());
                }
                Err(e) => {
                    if !self.failover {
                        return Err(ChannelError::DispatchFailed {
                            message_id: message.id(),
                            source: Some(e),
                        });
                    }
                    trace!(
                        channel = %self.channel,
                        message_id = message.id(),
                        error = %e,
                        "Handler failed, trying next"
                    );
                    last_failure = Some(e);
                }
            }
        }

        Err(ChannelError::DispatchFailed {
            message_id: message.id(),
            source: last_failure,
        })
    }
}

/// All-subscriber dispatcher, synchronous or pool-backed.
pub struct BroadcastDispatcher {
    channel: String,
    handlers: HandlerList,
    pool: Option<TaskPool>,
    require_subscribers: bool,
    error_channel: Option<Arc<dyn MessageChannel>>,
}

impl BroadcastDispatcher {
    /// Create a synchronous broadcast dispatcher for the named channel.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            handlers: HandlerList::default(),
            pool: None,
            require_subscribers: false,
            error_channel: None,
        }
    }

    /// Run each handler invocation as an independent pool task.
    #[must_use]
    pub fn with_pool(mut self, pool: TaskPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Fail sends on an empty subscriber set instead of treating them as a
    /// no-op.
    #[must_use]
    pub fn require_subscribers(mut self, required: bool) -> Self {
        self.require_subscribers = required;
        self
    }

    /// Route isolated per-handler failures to the given channel.
    #[must_use]
    pub fn with_error_channel(mut self, error_channel: Arc<dyn MessageChannel>) -> Self {
        self.error_channel = Some(error_channel);
        self
    }

    /// Whether this dispatcher runs handlers on a pool.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Attach a handler at the end of the subscription order.
    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.add(handler);
        debug!(channel = %self.channel, subscribers = self.handlers.len(), "Handler subscribed");
    }

    /// Detach a handler, compared by pointer identity.
    pub fn remove_handler(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        let removed = self.handlers.remove(handler);
        if removed {
            debug!(channel = %self.channel, subscribers = self.handlers.len(), "Handler unsubscribed");
        }
        removed
    }

    /// Get the number of subscribed handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Deliver a message to every subscribed handler.
    ///
    /// Without a pool: handlers run sequentially in subscription order on
    /// the caller's task; the first failure aborts the remainder. With a
    /// pool: each handler runs as its own task, `timeout` bounds each
    /// admission wait, and a handler failure is routed to the error channel
    /// (or logged) without affecting siblings.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NoSubscribers`] when required and the set is empty,
    /// [`ChannelError::DeliveryFailed`] on a synchronous abort,
    /// [`ChannelError::DispatchRejected`] when pool admission is refused.
    pub async fn dispatch(&self, message: Message, timeout: Timeout) -> Result<(), ChannelError> {
        let snapshot = self.handlers.snapshot();
        if snapshot.is_empty() {
            if self.require_subscribers {
                return Err(ChannelError::NoSubscribers(self.channel.clone()));
            }
            trace!(channel = %self.channel, message_id = message.id(), "Broadcast to empty channel");
            return Ok(());
        }

        match &self.pool {
            None => {
                for (delivered, handler) in snapshot.iter().enumerate() {
                    if let Err(e) = handler.handle(message.clone()).await {
                        return Err(ChannelError::DeliveryFailed {
                            delivered,
                            source: e,
                        });
                    }
                }
                trace!(
                    channel = %self.channel,
                    message_id = message.id(),
                    recipients = snapshot.len(),
                    "Broadcast complete"
                );
                Ok(())
            }
            Some(pool) => {
                for handler in snapshot {
                    let msg = message.clone();
                    let channel = self.channel.clone();
                    let error_channel = self.error_channel.clone();
                    pool.spawn(timeout, async move {
                        if let Err(e) = handler.handle(msg.clone()).await {
                            route_failure(&channel, error_channel.as_deref(), msg, e.to_string())
                                .await;
                        }
                    })
                    .await?;
                }
                Ok(())
            }
        }
    }
}

/// Forward an isolated delivery failure to the error channel, falling back
/// to a log record when none is configured or the error channel itself
/// refuses the envelope.
pub(crate) async fn route_failure(
    channel: &str,
    error_channel: Option<&dyn MessageChannel>,
    message: Message,
    reason: String,
) {
    match error_channel {
        Some(target) => {
            let envelope = Message::new(FailedDelivery::new(message, reason.clone()));
            match target.send_timeout(envelope, Timeout::Immediate).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(channel, error_channel = target.name(), %reason, "Error channel full, failure dropped from routing");
                }
                Err(e) => {
                    warn!(channel, error_channel = target.name(), %reason, routing_error = %e, "Failed to route delivery failure");
                }
            }
        }
        None => {
            warn!(channel, %reason, "Delivery failed with no error channel configured");
        }
    }
}
