//! Messages delivered by a queue source
//!
//! This module provides:
//! - [`MessageEnvelope`] - One delivery: payload, attributes and ack token
//! - [`AckToken`] - Opaque handle used to ack/nack a single delivery
//! - [`Batch`] - The envelopes returned by one poll

mod envelope;

pub use envelope::{AckToken, Batch, MessageEnvelope};
