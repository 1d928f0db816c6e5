//! Message envelope and batch types

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Opaque handle required to acknowledge or requeue one delivery
///
/// A token identifies a delivery, not a message: the same message delivered
/// twice carries two different tokens, and only the latest one is accepted
/// by the queue once the visibility timeout of the first has expired.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckToken(String);

impl AckToken {
    /// Wrap a provider receipt handle
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Provider representation of the token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A delivered message
///
/// Envelopes are immutable once created by a queue source. Cloning is cheap:
/// the payload is reference counted.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    message_id: String,
    payload: Bytes,
    attributes: HashMap<String, String>,
    ack_token: AckToken,
    receive_count: u32,
    source: String,
    received_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Create an envelope for a first delivery
    pub fn new(
        message_id: impl Into<String>,
        payload: impl Into<Bytes>,
        ack_token: AckToken,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            payload: payload.into(),
            attributes: HashMap::new(),
            ack_token,
            receive_count: 1,
            source: String::new(),
            received_at: Utc::now(),
        }
    }

    /// Attach queue-provided attributes
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Add a single attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set how many times the queue has delivered this message
    pub fn with_receive_count(mut self, count: u32) -> Self {
        self.receive_count = count.max(1);
        self
    }

    /// Set the name of the queue the message came from
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Provider message id (stable across redeliveries)
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as UTF-8, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Decode a JSON payload
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Queue-provided metadata
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Look up one attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Handle for acknowledging this delivery
    pub fn ack_token(&self) -> &AckToken {
        &self.ack_token
    }

    /// Number of times this message has been delivered (1 on first delivery)
    pub fn receive_count(&self) -> u32 {
        self.receive_count
    }

    /// Name of the queue the message was fetched from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// When the source handed this delivery out
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Envelopes returned by a single poll, in delivery order
///
/// An empty batch means no message became available within the poll wait.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    messages: Vec<MessageEnvelope>,
}

impl Batch {
    /// Create a batch from delivered envelopes
    pub fn new(messages: Vec<MessageEnvelope>) -> Self {
        Self { messages }
    }

    /// An empty batch
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessageEnvelope> {
        self.messages.iter()
    }
}

impl From<Vec<MessageEnvelope>> for Batch {
    fn from(messages: Vec<MessageEnvelope>) -> Self {
        Self::new(messages)
    }
}

impl IntoIterator for Batch {
    type Item = MessageEnvelope;
    type IntoIter = std::vec::IntoIter<MessageEnvelope>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
