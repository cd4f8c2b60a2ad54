//! # sluice-core
//!
//! In-process message channels and dispatch for the sluice pipeline layer.
//!
//! Producers and consumers exchange immutable [`Message`]s through named
//! channels without referencing each other. This crate provides the
//! delivery primitives and the handler-selection algorithms behind them:
//!
//! - **DirectChannel** - synchronous unicast on the sender's task
//! - **ExecutorChannel** - pool-backed asynchronous unicast
//! - **PublishSubscribeChannel** - broadcast, synchronous or pooled
//! - **QueueChannel** - buffered point-to-point, FIFO or priority order
//! - **PartitionedChannel** - key-sharded workers with per-key ordering
//! - **DatatypeChannel** - payload-type gate in front of any channel
//! - **ChannelPurger** / **ChannelRegistry** - drain and lookup utilities
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐     ┌─────────────────┐     ┌────────────┐
//! │  Sender  │────▶│     Channel     │────▶│ Dispatcher │
//! └──────────┘     └─────────────────┘     └────────────┘
//!                    buffer / workers             │
//!                                                 ▼
//!                                          ┌────────────┐
//!                                          │  Handlers  │
//!                                          └────────────┘
//! ```
//!
//! Dispatchers snapshot their handler list at the start of every dispatch,
//! so subscriptions may change concurrently with in-flight deliveries.
//! Blocking operations take a [`Timeout`]: infinite, immediate, or bounded;
//! expiry is reported as `false`/`None`, never as an error.

pub mod channel;
pub mod datatype;
pub mod dispatch;
pub mod direct;
pub mod error;
pub mod executor;
pub mod handler;
pub mod message;
pub mod partitioned;
pub mod pool;
pub mod pubsub;
pub mod purger;
pub mod queue;
pub mod registry;

pub use channel::{
    validate_channel_name, MessageChannel, PollableChannel, SubscribableChannel, Timeout,
};
pub use datatype::{DatatypeChannel, PayloadConverter};
pub use dispatch::{BroadcastDispatcher, LoadBalancing, UnicastDispatcher};
pub use direct::DirectChannel;
pub use error::{ChannelError, FailedDelivery};
pub use executor::ExecutorChannel;
pub use handler::{handler_fn, HandlerError, MessageHandler};
pub use message::{HeaderValue, Message, MessageBuilder, MessageId, Payload};
pub use partitioned::{PartitionConfig, PartitionedChannel};
pub use pool::TaskPool;
pub use pubsub::PublishSubscribeChannel;
pub use purger::ChannelPurger;
pub use queue::QueueChannel;
pub use registry::ChannelRegistry;
