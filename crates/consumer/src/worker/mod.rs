//! Worker pool for message handling
//!
//! This module provides:
//! - [`WorkerPool`] - Semaphore-bounded concurrent handler execution
//! - [`FailurePolicy`] - Ack/Nack resolution of handler outcomes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │                                                              │
//! │  dispatch() ──► Semaphore (concurrency permits)              │
//! │                     │                                        │
//! │                     ▼                                        │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │  [Slot 0] [Slot 1] ... [Slot N-1]   (TaskTracker)    │    │
//! │  │     handler ──► FailurePolicy ──► ack / nack         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod failure;
mod pool;

pub use failure::{AckDecision, FailurePolicy, FailureStrategy, ParseFailureStrategyError};
pub use pool::WorkerPool;
