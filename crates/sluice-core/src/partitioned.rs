//! Key-partitioned concurrent unicast channel.
//!
//! Messages sharing a partition key are processed by the same worker in
//! submission order; messages with different keys interleave freely across
//! workers. This trades global ordering for parallelism while keeping
//! causal order within each key.

use crate::channel::{MessageChannel, SubscribableChannel, Timeout};
use crate::dispatch::{route_failure, UnicastDispatcher};
use crate::error::ChannelError;
use crate::handler::MessageHandler;
use crate::message::{HeaderValue, Message};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Partition layout configuration.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Number of independent workers.
    pub partitions: usize,
    /// Per-worker queue capacity. A zero capacity is treated as 1
    /// (rendezvous-sized: a sender waits for the worker to take its
    /// message).
    pub worker_capacity: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            worker_capacity: 1,
        }
    }
}

/// Extracts the partition key from a message.
pub type PartitionKeyFn = Arc<dyn Fn(&Message) -> HeaderValue + Send + Sync>;

/// The default partition key: the `correlation-id` header, falling back to
/// the message ID (every message its own partition).
fn default_partition_key(message: &Message) -> HeaderValue {
    message
        .correlation_id()
        .cloned()
        .unwrap_or(HeaderValue::Int(message.id() as i64))
}

type ErrorRoute = RwLock<Option<Arc<dyn MessageChannel>>>;

/// A channel sharding unicast dispatch across a fixed set of workers.
///
/// The partition key is hashed with a fixed-key hasher, so the same key
/// maps to the same worker for the channel's lifetime. Each worker owns a
/// bounded queue; a full worker queue pushes back on senders under the
/// usual [`Timeout`] semantics. Workers stop when the channel is dropped.
///
/// Must be constructed inside a tokio runtime: the workers are spawned at
/// construction time.
pub struct PartitionedChannel {
    name: String,
    senders: Vec<mpsc::Sender<Message>>,
    dispatcher: Arc<UnicastDispatcher>,
    key_fn: PartitionKeyFn,
    error_route: Arc<ErrorRoute>,
}

impl PartitionedChannel {
    /// Create a partitioned channel and spawn its workers.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::IllegalArgument`] when the configuration
    /// asks for zero partitions.
    pub fn new(name: impl Into<String>, config: PartitionConfig) -> Result<Self, ChannelError> {
        if config.partitions == 0 {
            return Err(ChannelError::IllegalArgument(
                "partition count must be at least 1".into(),
            ));
        }
        let name = name.into();
        let dispatcher = Arc::new(UnicastDispatcher::new(name.clone()));
        let error_route: Arc<ErrorRoute> = Arc::new(RwLock::new(None));
        let capacity = config.worker_capacity.max(1);

        let mut senders = Vec::with_capacity(config.partitions);
        for partition in 0..config.partitions {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            spawn_worker(
                name.clone(),
                partition,
                rx,
                Arc::clone(&dispatcher),
                Arc::clone(&error_route),
            );
        }
        debug!(channel = %name, partitions = config.partitions, capacity, "Partitioned channel started");

        Ok(Self {
            name,
            senders,
            dispatcher,
            key_fn: Arc::new(default_partition_key),
            error_route,
        })
    }

    /// Replace the partition-key extraction function.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: PartitionKeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    /// Route worker-side dispatch failures to the given channel.
    #[must_use]
    pub fn with_error_channel(self, error_channel: Arc<dyn MessageChannel>) -> Self {
        *self
            .error_route
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(error_channel);
        self
    }

    /// Get the number of partitions.
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.senders.len()
    }

    /// Compute the worker index a message would be routed to.
    #[must_use]
    pub fn partition_for(&self, message: &Message) -> usize {
        let key = (self.key_fn)(message);
        (key.partition_hash() % self.senders.len() as u64) as usize
    }
}

fn spawn_worker(
    channel: String,
    partition: usize,
    mut rx: mpsc::Receiver<Message>,
    dispatcher: Arc<UnicastDispatcher>,
    error_route: Arc<ErrorRoute>,
) {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = dispatcher.dispatch(message.clone()).await {
                let error_channel = error_route
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                route_failure(&channel, error_channel.as_deref(), message, e.to_string()).await;
            }
        }
        trace!(channel = %channel, partition, "Partition worker stopped");
    });
}

#[async_trait]
impl MessageChannel for PartitionedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_timeout(
        &self,
        message: Message,
        timeout: Timeout,
    ) -> Result<bool, ChannelError> {
        let partition = self.partition_for(&message);
        trace!(channel = %self.name, message_id = message.id(), partition, "Routing");
        let sender = &self.senders[partition];
        match timeout {
            Timeout::Immediate => match sender.try_send(message) {
                Ok(()) => Ok(true),
                Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::IllegalState(
                    format!("partition worker {partition} of channel '{}' stopped", self.name),
                )),
            },
            Timeout::Infinite => match sender.send(message).await {
                Ok(()) => Ok(true),
                Err(_) => Err(ChannelError::IllegalState(format!(
                    "partition worker {partition} of channel '{}' stopped",
                    self.name
                ))),
            },
            Timeout::Bounded(wait) => match sender.send_timeout(message, wait).await {
                Ok(()) => Ok(true),
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => Ok(false),
                Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(ChannelError::IllegalState(
                    format!("partition worker {partition} of channel '{}' stopped", self.name),
                )),
            },
        }
    }
}

impl SubscribableChannel for PartitionedChannel {
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
