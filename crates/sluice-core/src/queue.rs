//! Buffered point-to-point channel with FIFO or priority ordering.

use crate::channel::{MessageChannel, PollableChannel, Timeout};
use crate::error::ChannelError;
use crate::message::Message;
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::trace;

/// A buffered message with its priority rank and send sequence number.
struct Ranked {
    priority: Option<i64>,
    seq: u64,
    message: Message,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    // Max-heap order: higher priority wins, absent priority ranks below
    // every present one, ties go to the earlier sequence number.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum Buffer {
    Fifo(VecDeque<Message>),
    Priority(BinaryHeap<Ranked>),
}

impl Buffer {
    fn len(&self) -> usize {
        match self {
            Self::Fifo(q) => q.len(),
            Self::Priority(h) => h.len(),
        }
    }

    fn push(&mut self, message: Message, seq: u64) {
        match self {
            Self::Fifo(q) => q.push_back(message),
            Self::Priority(h) => h.push(Ranked {
                priority: message.priority(),
                seq,
                message,
            }),
        }
    }

    fn pop(&mut self) -> Option<Message> {
        match self {
            Self::Fifo(q) => q.pop_front(),
            Self::Priority(h) => h.pop().map(|r| r.message),
        }
    }

    /// Drain everything, in queue order.
    fn drain_all(&mut self) -> Vec<Message> {
        match self {
            Self::Fifo(q) => q.drain(..).collect(),
            Self::Priority(h) => {
                let mut drained = Vec::with_capacity(h.len());
                while let Some(r) = h.pop() {
                    drained.push(r.message);
                }
                drained
            }
        }
    }

    /// Remove and return the messages `predicate` rejects, keeping accepted
    /// messages in their original relative order. Removed messages come
    /// back in send order.
    fn reject(&mut self, predicate: &(dyn Fn(&Message) -> bool + Sync)) -> Vec<Message> {
        match self {
            Self::Fifo(q) => {
                let mut kept = VecDeque::with_capacity(q.len());
                let mut removed = Vec::new();
                for message in q.drain(..) {
                    if predicate(&message) {
                        kept.push_back(message);
                    } else {
                        removed.push(message);
                    }
                }
                *q = kept;
                removed
            }
            Self::Priority(h) => {
                let mut kept = BinaryHeap::with_capacity(h.len());
                let mut removed = Vec::new();
                for ranked in h.drain() {
                    if predicate(&ranked.message) {
                        kept.push(ranked);
                    } else {
                        removed.push(ranked);
                    }
                }
                *h = kept;
                removed.sort_by_key(|r| r.seq);
                removed.into_iter().map(|r| r.message).collect()
            }
        }
    }
}

struct QueueState {
    buffer: Buffer,
    capacity: Option<usize>,
    next_seq: u64,
}

impl QueueState {
    fn has_space(&self) -> bool {
        self.capacity.map_or(true, |cap| self.buffer.len() < cap)
    }
}

/// A buffered channel: senders enqueue, consumers poll.
///
/// FIFO by default; the `priority` constructors order the buffer by
/// descending `priority` header instead, with ties (and absent priorities)
/// resolved by send order, so the delivery order is a deterministic total
/// order even though the underlying heap is not stable.
///
/// A bounded queue pushes back on senders: a full buffer blocks `send`
/// according to its [`Timeout`], and an empty buffer blocks `receive` the
/// same way.
pub struct QueueChannel {
    name: String,
    state: Mutex<QueueState>,
    space: Notify,
    data: Notify,
}

impl QueueChannel {
    /// Create an unbounded FIFO queue channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name, None, false)
    }

    /// Create a bounded FIFO queue channel. A zero capacity is treated
    /// as 1.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self::build(name, Some(capacity.max(1)), false)
    }

    /// Create an unbounded priority-ordered channel.
    #[must_use]
    pub fn priority(name: impl Into<String>) -> Self {
        Self::build(name, None, true)
    }

    /// Create a bounded priority-ordered channel. A zero capacity is
    /// treated as 1.
    #[must_use]
    pub fn priority_with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self::build(name, Some(capacity.max(1)), true)
    }

    fn build(name: impl Into<String>, capacity: Option<usize>, prioritized: bool) -> Self {
        let buffer = if prioritized {
            Buffer::Priority(BinaryHeap::new())
        } else {
            Buffer::Fifo(VecDeque::new())
        };
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                buffer,
                capacity,
                next_seq: 0,
            }),
            space: Notify::new(),
            data: Notify::new(),
        }
    }

    /// Get the number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().buffer.len()
    }

    /// Check whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the configured capacity, if bounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.lock_state().capacity
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageChannel for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_timeout(
        &self,
        message: Message,
        timeout: Timeout,
    ) -> Result<bool, ChannelError> {
        let deadline = match timeout {
            Timeout::Bounded(wait) => Some(tokio::time::Instant::now() + wait),
            _ => None,
        };
        let mut message = Some(message);
        loop {
            // Register interest before re-checking the condition so a
            // wakeup between the check and the await is not lost.
            let notified = self.space.notified();
            {
                let mut state = self.lock_state();
                if state.has_space() {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    if let Some(message) = message.take() {
                        trace!(channel = %self.name, message_id = message.id(), "Enqueued");
                        state.buffer.push(message, seq);
                    }
                    let space_left = state.has_space();
                    drop(state);
                    self.data.notify_one();
                    if space_left {
                        // Pass the wakeup along to the next blocked sender.
                        self.space.notify_one();
                    }
                    return Ok(true);
                }
            }
            match deadline {
                None => match timeout {
                    Timeout::Immediate => return Ok(false),
                    _ => notified.await,
                },
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(false);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PollableChannel for QueueChannel {
    async fn receive_timeout(&self, timeout: Timeout) -> Option<Message> {
        let deadline = match timeout {
            Timeout::Bounded(wait) => Some(tokio::time::Instant::now() + wait),
            _ => None,
        };
        loop {
            let notified = self.data.notified();
            {
                let mut state = self.lock_state();
                if let Some(message) = state.buffer.pop() {
                    let data_left = state.buffer.len() > 0;
                    drop(state);
                    self.space.notify_one();
                    if data_left {
                        self.data.notify_one();
                    }
                    return Some(message);
                }
            }
            match deadline {
                None => match timeout {
                    Timeout::Immediate => return None,
                    _ => notified.await,
                },
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    fn clear(&self) -> Vec<Message> {
        let drained = {
            let mut state = self.lock_state();
            state.buffer.drain_all()
        };
        if !drained.is_empty() {
            trace!(channel = %self.name, count = drained.len(), "Cleared");
            self.space.notify_one();
        }
        drained
    }

    fn purge(&self, predicate: &(dyn Fn(&Message) -> bool + Sync)) -> Vec<Message> {
        let removed = {
            let mut state = self.lock_state();
            state.buffer.reject(predicate)
        };
        if !removed.is_empty() {
            trace!(channel = %self.name, count = removed.len(), "Purged");
            self.space.notify_one();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn payloads(messages: &[Message]) -> Vec<&str> {
        messages
            .iter()
            .map(|m| *m.payload_ref::<&str>().expect("str payload"))
            .collect()
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let channel = QueueChannel::with_capacity("q", 8);
        for label in ["a", "b", "c"] {
            assert!(channel.send(Message::new(label)).await.unwrap());
        }
        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(channel.receive_timeout(Timeout::Immediate).await.unwrap());
        }
        assert_eq!(payloads(&received), vec!["a", "b", "c"]);
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_fails_fast_without_modification() {
        let channel = QueueChannel::with_capacity("q", 2);
        assert!(channel.send(Message::new("a")).await.unwrap());
        assert!(channel.send(Message::new("b")).await.unwrap());

        let sent = channel
            .send_timeout(Message::new("c"), Timeout::Immediate)
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(channel.len(), 2);
        let received = channel.receive_timeout(Timeout::Immediate).await.unwrap();
        assert_eq!(received.payload_ref::<&str>(), Some(&"a"));
    }

    #[tokio::test]
    async fn test_bounded_wait_expires() {
        let channel = QueueChannel::with_capacity("q", 1);
        assert!(channel.send(Message::new("a")).await.unwrap());
        let sent = channel
            .send_timeout(Message::new("b"), Timeout::Bounded(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(!sent);

        assert!(channel
            .receive_timeout(Timeout::Bounded(Duration::from_millis(20)))
            .await
            .is_some());
        assert!(channel
            .receive_timeout(Timeout::Bounded(Duration::from_millis(20)))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_blocked_sender_wakes_on_space() {
        let channel = Arc::new(QueueChannel::with_capacity("q", 1));
        assert!(channel.send(Message::new("a")).await.unwrap());

        let sender = Arc::clone(&channel);
        let blocked = tokio::spawn(async move { sender.send(Message::new("b")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(channel.receive().await.is_some());
        assert!(blocked.await.unwrap().unwrap());
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_receiver_wakes_on_data() {
        let channel = Arc::new(QueueChannel::new("q"));
        let receiver = Arc::clone(&channel);
        let blocked = tokio::spawn(async move { receiver.receive().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(channel.send(Message::new("a")).await.unwrap());
        let received = blocked.await.unwrap().unwrap();
        assert_eq!(received.payload_ref::<&str>(), Some(&"a"));
    }

    #[tokio::test]
    async fn test_priority_order() {
        let channel = QueueChannel::priority("q");
        for priority in [0i64, -99, 10, -3, 7] {
            let message = Message::builder("p").priority(priority).build();
            assert!(channel.send(message).await.unwrap());
        }

        let mut priorities = Vec::new();
        while let Some(message) = channel.receive_timeout(Timeout::Immediate).await {
            priorities.push(message.priority().unwrap());
        }
        assert_eq!(priorities, vec![10, 7, 0, -3, -99]);
    }

    #[tokio::test]
    async fn test_equal_and_absent_priority_preserve_send_order() {
        let channel = QueueChannel::priority("q");
        assert!(channel.send(Message::builder("first-5").priority(5).build()).await.unwrap());
        assert!(channel.send(Message::new("first-none")).await.unwrap());
        assert!(channel.send(Message::builder("second-5").priority(5).build()).await.unwrap());
        assert!(channel.send(Message::new("second-none")).await.unwrap());

        let mut received = Vec::new();
        while let Some(message) = channel.receive_timeout(Timeout::Immediate).await {
            received.push(message);
        }
        assert_eq!(
            payloads(&received),
            vec!["first-5", "second-5", "first-none", "second-none"]
        );
    }

    #[tokio::test]
    async fn test_clear_drains_everything() {
        let channel = QueueChannel::with_capacity("q", 2);
        assert!(channel.send(Message::new("a")).await.unwrap());
        assert!(channel.send(Message::new("b")).await.unwrap());

        let drained = channel.clear();
        assert_eq!(payloads(&drained), vec!["a", "b"]);
        assert!(channel.is_empty());
        // Capacity is free again.
        assert!(channel
            .send_timeout(Message::new("c"), Timeout::Immediate)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_purge_removes_rejected_keeps_order() {
        let channel = QueueChannel::new("q");
        for label in ["keep-1", "drop-1", "keep-2", "drop-2"] {
            assert!(channel.send(Message::new(label)).await.unwrap());
        }

        let removed = channel.purge(&|m: &Message| {
            m.payload_ref::<&str>().is_some_and(|p| p.starts_with("keep"))
        });
        assert_eq!(payloads(&removed), vec!["drop-1", "drop-2"]);

        let mut kept = Vec::new();
        while let Some(message) = channel.receive_timeout(Timeout::Immediate).await {
            kept.push(message);
        }
        assert_eq!(payloads(&kept), vec!["keep-1", "keep-2"]);
    }

    #[tokio::test]
    async fn test_purge_frees_capacity_for_blocked_sender() {
        let channel = Arc::new(QueueChannel::with_capacity("q", 2));
        assert!(channel.send(Message::new("drop-1")).await.unwrap());
        assert!(channel.send(Message::new("keep-1")).await.unwrap());

        let sender = Arc::clone(&channel);
        let blocked = tokio::spawn(async move { sender.send(Message::new("late")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = channel.purge(&|m: &Message| {
            m.payload_ref::<&str>().is_some_and(|p| p.starts_with("keep"))
        });
        assert_eq!(removed.len(), 1);
        assert!(blocked.await.unwrap().unwrap());
        assert_eq!(channel.len(), 2);
    }
}
