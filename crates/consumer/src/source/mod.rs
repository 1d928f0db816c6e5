//! Queue sources
//!
//! This module provides:
//! - [`QueueSource`] trait for polling and acknowledging messages
//! - [`PollRequest`] with the long-poll, batch and visibility tunables
//! - [`InMemoryQueue`] for tests and local runs

mod memory;
mod queue;

pub use memory::{DeadLetter, InMemoryQueue};
pub use queue::{PollRequest, QueueSource, SourceError};
