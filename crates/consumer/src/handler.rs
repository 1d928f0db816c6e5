//! Message handler trait and execution context

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::message::MessageEnvelope;

/// Error type for handler failures
///
/// Handler errors never stop the consumer. They are resolved by the
/// failure strategy (ack or nack) and logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl HandlerError {
    /// Create a new handler error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            details: None,
        }
    }

    /// Error recorded when the handler panicked
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(message).with_type("panic")
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether this error came from a caught panic
    pub fn is_panic(&self) -> bool {
        self.error_type.as_deref() == Some("panic")
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{} ({})", self.message, error_type),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with_type("decode")
    }
}

/// Context passed to every handler invocation
///
/// The cancellation token is the consumer's shutdown signal. The consumer
/// never aborts a running handler; long handlers that want to stop early on
/// shutdown should watch [`HandlerContext::cancelled`].
#[derive(Debug, Clone)]
pub struct HandlerContext {
    consumer: Arc<str>,
    slot: usize,
    cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(consumer: Arc<str>, slot: usize, cancel: CancellationToken) -> Self {
        Self {
            consumer,
            slot,
            cancel,
        }
    }

    /// Name of the consumer running this handler
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Worker slot index, in `0..concurrency`
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// The underlying cancellation token, for passing to other APIs
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Processes one message
///
/// Must be safe to call concurrently from every worker slot. Returning `Ok`
/// acknowledges the message; returning `Err` hands it to the failure
/// strategy.
///
/// # Example
///
/// ```ignore
/// struct PrintHandler;
///
/// #[async_trait]
/// impl MessageHandler for PrintHandler {
///     async fn handle(
///         &self,
///         _ctx: &HandlerContext,
///         message: &MessageEnvelope,
///     ) -> Result<(), HandlerError> {
///         println!("{:?}", message.payload_str());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        message: &MessageEnvelope,
    ) -> Result<(), HandlerError>;
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(HandlerContext, MessageEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: &HandlerContext,
        message: &MessageEnvelope,
    ) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), message.clone()).await
    }
}

/// Build a handler from an async closure
///
/// ```ignore
/// let handler = handler_fn(|_ctx, message| async move {
///     tracing::info!(payload = ?message.payload_str(), "Received message");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(HandlerContext, MessageEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AckToken;

    fn context() -> HandlerContext {
        HandlerContext::new(Arc::from("test"), 0, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_handler_fn_receives_message() {
        let handler = handler_fn(|ctx, message| async move {
            assert_eq!(ctx.consumer(), "test");
            if message.payload() == b"bad" {
                return Err(HandlerError::new("bad payload"));
            }
            Ok(())
        });

        let good = MessageEnvelope::new("1", "good", AckToken::new("t1"));
        let bad = MessageEnvelope::new("2", "bad", AckToken::new("t2"));

        assert!(handler.handle(&context(), &good).await.is_ok());
        assert_eq!(
            handler.handle(&context(), &bad).await,
            Err(HandlerError::new("bad payload"))
        );
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(HandlerError::new("boom").to_string(), "boom");
        assert_eq!(
            HandlerError::new("boom").with_type("io").to_string(),
            "boom (io)"
        );
        assert!(HandlerError::panicked("oops").is_panic());
    }

    #[test]
    fn test_handler_error_from_anyhow() {
        let err: HandlerError = anyhow::anyhow!("inner").context("outer").into();
        assert_eq!(err.message, "outer: inner");
    }

    #[test]
    fn test_context_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = HandlerContext::new(Arc::from("test"), 3, token.clone());
        assert_eq!(ctx.slot(), 3);
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
