//! QueueSource trait definition

use std::time::Duration;

use async_trait::async_trait;

use crate::message::{AckToken, Batch};

/// Error type for queue source operations
///
/// When returned from [`QueueSource::poll`] these are consumption errors and
/// feed the retry governor. When returned from `ack`/`nack` they are logged
/// and the message is left to the queue's visibility timeout.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials rejected or permission revoked
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Provider rejected the request
    #[error("provider error ({code}): {message}")]
    Provider { code: String, message: String },

    /// The token does not match a live delivery (expired or already resolved)
    #[error("invalid or expired ack token: {0}")]
    InvalidToken(AckToken),

    /// The source has been closed and accepts no further calls
    #[error("queue source is closed")]
    Closed,
}

/// Parameters for a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    /// Upper bound on the number of envelopes to return
    pub max_messages: usize,

    /// How long the source may wait for at least one message
    pub wait: Duration,

    /// How long delivered messages stay hidden from other consumers
    pub visibility_timeout: Duration,
}

/// A remote at-least-once queue
///
/// Implementations must be safe to share across workers: `ack` and `nack`
/// are called concurrently from every worker slot while the consumption
/// loop polls.
#[async_trait]
pub trait QueueSource: Send + Sync + 'static {
    /// Queue name, stamped on every envelope as its source
    fn name(&self) -> &str;

    /// Fetch up to `request.max_messages` envelopes
    ///
    /// Waits up to `request.wait` for at least one message and returns as
    /// soon as any exist. Returns an empty batch when the wait elapses; that
    /// is not an error.
    async fn poll(&self, request: &PollRequest) -> Result<Batch, SourceError>;

    /// Permanently remove the delivered message
    async fn ack(&self, token: &AckToken) -> Result<(), SourceError>;

    /// Make the delivered message visible again for redelivery
    async fn nack(&self, token: &AckToken) -> Result<(), SourceError>;
}
