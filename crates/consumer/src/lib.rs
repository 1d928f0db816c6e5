//! # Queue Consumption Engine
//!
//! Continuously pulls messages from an at-least-once queue, fans them out to
//! a bounded pool of workers running a user-supplied handler, and applies
//! failure and retry policies around the consumption loop.
//!
//! ## Features
//!
//! - **Pluggable sources**: any queue implementing [`QueueSource`] (poll, ack, nack)
//! - **Bounded concurrency**: at most `concurrency` messages in flight, with backpressure
//! - **Failure strategy**: handler errors ack or nack the message, never stop the consumer
//! - **Retry governor**: consumption errors retry with a fixed wait, then fail once
//! - **Graceful shutdown**: in-flight messages are resolved before `start` returns
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Consumer                              │
//! │  (poll loop, RetryGovernor for consumption errors)          │
//! └─────────────────────────────────────────────────────────────┘
//!          │ poll                                 │ dispatch
//!          ▼                                      ▼
//! ┌──────────────────────┐        ┌─────────────────────────────┐
//! │     QueueSource      │ ◄───── │         WorkerPool           │
//! │  (poll, ack, nack)   │ ack/   │  (handler + FailurePolicy)   │
//! └──────────────────────┘ nack   └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use everruns_consumer::prelude::*;
//!
//! let queue = Arc::new(InMemoryQueue::new("payments"));
//!
//! let consumer = Consumer::new(
//!     "payments",
//!     queue,
//!     Arc::new(handler_fn(|_ctx, message| async move {
//!         let payment: Payment = message.decode_json()?;
//!         process(payment).await?;
//!         Ok(())
//!     })),
//!     ConsumerConfig::default()
//!         .with_concurrency(10)
//!         .with_failure_strategy(FailureStrategy::Nack)
//!         .with_consume_retry_limit(3)
//!         .with_consume_retry_wait(Duration::from_secs(30)),
//! )?;
//!
//! consumer.start(CancellationToken::new()).await?;
//! ```

pub mod engine;
pub mod handler;
pub mod message;
pub mod reliability;
pub mod source;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{
        Component, ConfigError, Consumer, ConsumerConfig, ConsumerError, ConsumerStatus,
    };
    pub use crate::handler::{handler_fn, HandlerContext, HandlerError, MessageHandler};
    pub use crate::message::{AckToken, Batch, MessageEnvelope};
    pub use crate::reliability::{ConsumptionHealth, RetryDecision, RetryGovernor};
    pub use crate::source::{InMemoryQueue, PollRequest, QueueSource, SourceError};
    pub use crate::worker::{AckDecision, FailurePolicy, FailureStrategy, WorkerPool};
    pub use tokio_util::sync::CancellationToken;
}

// Re-export key types at crate root
pub use engine::{Component, ConfigError, Consumer, ConsumerConfig, ConsumerError, ConsumerStatus};
pub use handler::{handler_fn, HandlerContext, HandlerError, MessageHandler};
pub use message::{AckToken, Batch, MessageEnvelope};
pub use reliability::{ConsumptionHealth, RetryDecision, RetryGovernor};
pub use source::{InMemoryQueue, PollRequest, QueueSource, SourceError};
pub use worker::{AckDecision, FailurePolicy, FailureStrategy, WorkerPool};
