//! Immutable message envelopes exchanged through channels.
//!
//! A [`Message`] carries an opaque payload plus a header map. Producers and
//! consumers never see each other; the envelope is the only contract.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

/// An opaque, shareable message payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    // Combine timestamp with atomic counter for guaranteed uniqueness
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reserved header names.
///
/// `id` and `timestamp` are first-class fields on [`Message`] rather than map
/// entries; attempts to set them through the builder are ignored.
pub mod headers {
    /// Ordered integer delivery priority.
    pub const PRIORITY: &str = "priority";
    /// Channel name a reply should be sent to.
    pub const REPLY_DESTINATION: &str = "reply-destination";
    /// Channel name delivery failures should be sent to.
    pub const ERROR_DESTINATION: &str = "error-destination";
    /// Identifier shared by all messages derived from one origin.
    pub const CORRELATION_ID: &str = "correlation-id";

    pub(crate) const ID: &str = "id";
    pub(crate) const TIMESTAMP: &str = "timestamp";
}

/// A typed header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// UTF-8 text.
    Text(String),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// Arbitrary structured value.
    Json(serde_json::Value),
}

impl HeaderValue {
    /// Get the value as an integer, if it is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as text, if it is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Hash the value into a stable partition hash.
    ///
    /// Uses the standard library's fixed-key `DefaultHasher`, so the same
    /// value always lands on the same partition for the life of the process.
    #[must_use]
    pub fn partition_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        match self {
            Self::Text(v) => {
                0u8.hash(&mut hasher);
                v.hash(&mut hasher);
            }
            Self::Int(v) => {
                1u8.hash(&mut hasher);
                v.hash(&mut hasher);
            }
            Self::Float(v) => {
                2u8.hash(&mut hasher);
                v.to_bits().hash(&mut hasher);
            }
            Self::Bool(v) => {
                3u8.hash(&mut hasher);
                v.hash(&mut hasher);
            }
            Self::Json(v) => {
                4u8.hash(&mut hasher);
                v.to_string().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<serde_json::Value> for HeaderValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// An immutable message envelope.
///
/// The payload is opaque to the channel layer; consumers downcast it with
/// [`Message::payload_ref`] or [`Message::payload_arc`]. Cloning is cheap:
/// the payload is shared, only the header map is copied.
#[derive(Clone)]
pub struct Message {
    /// Unique message identifier, assigned at creation.
    id: MessageId,
    /// Creation time in milliseconds since the epoch.
    timestamp: u64,
    /// Opaque payload.
    payload: Payload,
    /// Concrete payload type name, captured at construction.
    payload_type: &'static str,
    /// Header map.
    headers: HashMap<String, HeaderValue>,
}

impl Message {
    /// Create a message with the given payload and no headers.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self::builder(payload).build()
    }

    /// Start building a message with the given payload.
    #[must_use]
    pub fn builder<T: Any + Send + Sync>(payload: T) -> MessageBuilder {
        MessageBuilder {
            payload: Arc::new(payload),
            payload_type: std::any::type_name::<T>(),
            headers: HashMap::new(),
        }
    }

    /// Get the unique message ID.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Get the creation timestamp in milliseconds since the epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Get the raw payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Get the concrete type name of the payload.
    #[must_use]
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Borrow the payload as a concrete type.
    #[must_use]
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Get a shared handle to the payload as a concrete type.
    #[must_use]
    pub fn payload_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }

    /// Get a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Get the full header map.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, HeaderValue> {
        &self.headers
    }

    /// Get the delivery priority, if one was set.
    #[must_use]
    pub fn priority(&self) -> Option<i64> {
        self.headers.get(headers::PRIORITY).and_then(HeaderValue::as_int)
    }

    /// Get the correlation ID, if one was set.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&HeaderValue> {
        self.headers.get(headers::CORRELATION_ID)
    }

    /// Get the reply destination channel name, if one was set.
    #[must_use]
    pub fn reply_destination(&self) -> Option<&str> {
        self.headers
            .get(headers::REPLY_DESTINATION)
            .and_then(HeaderValue::as_text)
    }

    /// Get the error destination channel name, if one was set.
    #[must_use]
    pub fn error_destination(&self) -> Option<&str> {
        self.headers
            .get(headers::ERROR_DESTINATION)
            .and_then(HeaderValue::as_text)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("payload_type", &self.payload_type)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Builder for [`Message`].
#[derive(Clone)]
pub struct MessageBuilder {
    payload: Payload,
    payload_type: &'static str,
    headers: HashMap<String, HeaderValue>,
}

impl MessageBuilder {
    /// Derive a builder from an existing message.
    ///
    /// The derived message keeps the original's headers and payload but
    /// receives a fresh ID and timestamp. The `correlation-id` header is
    /// seeded from the original's ID when the original carries none, so a
    /// chain of derived messages stays traceable to its origin.
    #[must_use]
    pub fn derive_from(original: &Message) -> Self {
        let mut headers = original.headers.clone();
        headers
            .entry(headers::CORRELATION_ID.to_string())
            .or_insert(HeaderValue::Int(original.id as i64));
        Self {
            payload: Arc::clone(&original.payload),
            payload_type: original.payload_type,
            headers,
        }
    }

    /// Replace the payload.
    #[must_use]
    pub fn payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Arc::new(payload);
        self.payload_type = std::any::type_name::<T>();
        self
    }

    /// Replace the payload with an already-erased value.
    pub(crate) fn payload_erased(mut self, payload: Payload, payload_type: &'static str) -> Self {
        self.payload = payload;
        self.payload_type = payload_type;
        self
    }

    /// Set a header. Setting `id` or `timestamp` is ignored; those are
    /// assigned at build time and never overwritten.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        let name = name.into();
        if name != headers::ID && name != headers::TIMESTAMP {
            self.headers.insert(name, value.into());
        }
        self
    }

    /// Set the delivery priority header.
    #[must_use]
    pub fn priority(self, priority: i64) -> Self {
        self.header(headers::PRIORITY, priority)
    }

    /// Set the correlation ID header.
    #[must_use]
    pub fn correlation_id(self, value: impl Into<HeaderValue>) -> Self {
        self.header(headers::CORRELATION_ID, value)
    }

    /// Set the reply destination header.
    #[must_use]
    pub fn reply_destination(self, channel: impl Into<String>) -> Self {
        self.header(headers::REPLY_DESTINATION, channel.into())
    }

    /// Set the error destination header.
    #[must_use]
    pub fn error_destination(self, channel: impl Into<String>) -> Self {
        self.header(headers::ERROR_DESTINATION, channel.into())
    }

    /// Finalize the message, assigning its ID and timestamp.
    #[must_use]
    pub fn build(self) -> Message {
        Message {
            id: generate_message_id(),
            timestamp: now_millis(),
            payload: self.payload,
            payload_type: self.payload_type,
            headers: self.headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("hello".to_string());
        assert_eq!(msg.payload_ref::<String>().map(String::as_str), Some("hello"));
        assert!(msg.headers().is_empty());
        assert!(msg.priority().is_none());
    }

    #[test]
    fn test_unique_message_ids() {
        let id1 = generate_message_id();
        let id2 = generate_message_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_builder_headers() {
        let msg = Message::builder(42i32)
            .priority(7)
            .reply_destination("replies")
            .header("tenant", "acme")
            .build();

        assert_eq!(msg.priority(), Some(7));
        assert_eq!(msg.reply_destination(), Some("replies"));
        assert_eq!(msg.header("tenant"), Some(&HeaderValue::Text("acme".into())));
        assert_eq!(msg.payload_ref::<i32>(), Some(&42));
    }

    #[test]
    fn test_reserved_headers_ignored() {
        let msg = Message::builder(()).header("id", 99i64).header("timestamp", 0i64).build();
        assert!(msg.header("id").is_none());
        assert!(msg.header("timestamp").is_none());
    }

    #[test]
    fn test_derived_message_gets_new_id_and_correlation() {
        let original = Message::builder("payload").header("tenant", "acme").build();
        let derived = MessageBuilder::derive_from(&original).build();

        assert_ne!(derived.id(), original.id());
        assert_eq!(derived.header("tenant"), original.header("tenant"));
        assert_eq!(
            derived.correlation_id(),
            Some(&HeaderValue::Int(original.id() as i64))
        );

        // An explicit correlation ID survives derivation unchanged.
        let tagged = Message::builder("payload").correlation_id("order-17").build();
        let derived = MessageBuilder::derive_from(&tagged).build();
        assert_eq!(derived.correlation_id(), Some(&HeaderValue::Text("order-17".into())));
    }

    #[test]
    fn test_payload_downcast() {
        let msg = Message::new(vec![1u8, 2, 3]);
        assert_eq!(msg.payload_ref::<Vec<u8>>(), Some(&vec![1u8, 2, 3]));
        assert!(msg.payload_ref::<String>().is_none());

        let arc = msg.payload_arc::<Vec<u8>>().unwrap();
        assert_eq!(arc.len(), 3);
    }

    #[test]
    fn test_opaque_byte_payload() {
        let msg = Message::new(bytes::Bytes::from_static(b"frame"));
        assert_eq!(
            msg.payload_ref::<bytes::Bytes>().map(|b| &b[..]),
            Some(&b"frame"[..])
        );
    }

    #[test]
    fn test_partition_hash_is_stable() {
        let a = HeaderValue::Text("order-1".into());
        let b = HeaderValue::Text("order-1".into());
        assert_eq!(a.partition_hash(), b.partition_hash());
        assert_ne!(
            HeaderValue::Int(1).partition_hash(),
            HeaderValue::Text("1".into()).partition_hash()
        );
    }
}
