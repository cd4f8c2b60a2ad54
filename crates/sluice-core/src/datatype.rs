//! Payload-type gating decorator.

use crate::channel::{MessageChannel, Timeout};
use crate::error::ChannelError;
use crate::message::{Message, MessageBuilder, Payload};
use async_trait::async_trait;
use std::any::TypeId;
use std::sync::Arc;

/// Converts payloads toward a channel's accepted types.
pub trait PayloadConverter: Send + Sync {
    /// Attempt to convert the payload to the target type. Returns the
    /// erased converted payload, or `None` when this conversion is not
    /// possible.
    fn convert(&self, payload: &Payload, target: TypeId) -> Option<Payload>;
}

/// A decorator rejecting messages whose payload type the underlying
/// channel does not accept.
///
/// The gate runs before the inner channel sees the message: a payload
/// whose runtime type matches an accepted type passes through unchanged; a
/// mismatch is offered to the converter against each accepted type in
/// declaration order, forwarding a derived message on success; anything
/// else fails with [`ChannelError::DeliveryRejected`].
///
/// With no accepted types configured, every payload passes.
pub struct DatatypeChannel {
    inner: Arc<dyn MessageChannel>,
    accepted: Vec<(TypeId, &'static str)>,
    converter: Option<Arc<dyn PayloadConverter>>,
}

impl DatatypeChannel {
    /// Wrap a channel with an empty accepted-type set.
    #[must_use]
    pub fn new(inner: Arc<dyn MessageChannel>) -> Self {
        Self {
            inner,
            accepted: Vec::new(),
            converter: None,
        }
    }

    /// Add an accepted payload type.
    #[must_use]
    pub fn accept<T: 'static>(mut self) -> Self {
        self.accepted
            .push((TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    /// Install a converter consulted when the payload type does not match.
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn PayloadConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    fn expected_types(&self) -> String {
        self.accepted
            .iter()
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl MessageChannel for DatatypeChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send_timeout(
        &self,
        message: Message,
        timeout: Timeout,
    ) -> Result<bool, ChannelError> {
        if self.accepted.is_empty() {
            return self.inner.send_timeout(message, timeout).await;
        }

        // First pass: the payload type already matches.
        let actual = message.payload().as_ref().type_id();
        if self.accepted.iter().any(|(id, _)| *id == actual) {
            return self.inner.send_timeout(message, timeout).await;
        }

        // Second pass: try converting, attempting accepted types in order.
        if let Some(converter) = &self.converter {
            for (target, type_name) in &self.accepted {
                if let Some(converted) = converter.convert(message.payload(), *target) {
                    let derived = MessageBuilder::derive_from(&message)
                        .payload_erased(converted, type_name)
                        .build();
                    return self.inner.send_timeout(derived, timeout).await;
                }
            }
        }

        Err(ChannelError::DeliveryRejected {
            channel: self.inner.name().to_string(),
            expected: self.expected_types(),
            actual: message.payload_type(),
        })
    }
}
