//! Consumption loop and lifecycle
//!
//! This module provides:
//! - [`Consumer`] - Polls a queue source and feeds the worker pool
//! - [`ConsumerConfig`] - Validated engine configuration
//! - [`Component`] - Start/stop contract driven by the host process
//!
//! # Example
//!
//! ```ignore
//! use everruns_consumer::prelude::*;
//!
//! let config = ConsumerConfig::default()
//!     .with_concurrency(10)
//!     .with_max_messages_per_poll(5)
//!     .with_failure_strategy(FailureStrategy::Nack)
//!     .with_consume_retry_limit(3)
//!     .with_consume_retry_wait(Duration::from_secs(30));
//!
//! let consumer = Consumer::new("orders", queue, Arc::new(handler), config)?;
//!
//! // Blocks until cancelled, stopped, or consumption fails for good
//! consumer.start(CancellationToken::new()).await?;
//! ```

mod component;
mod config;
mod consumer;
mod error;

pub use component::Component;
pub use config::{ConfigError, ConsumerConfig};
pub use consumer::{Consumer, ConsumerStatus};
pub use error::ConsumerError;
