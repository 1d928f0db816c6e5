//! Reliability patterns for queue consumption
//!
//! This module provides:
//! - [`RetryGovernor`] - Bounded fixed-wait retries for consumption errors

mod retry;

pub use retry::{ConsumptionHealth, RetryDecision, RetryGovernor};
