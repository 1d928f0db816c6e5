//! Retry governor for consumption errors
//!
//! Only failures to poll the queue count here. Handler failures are
//! resolved per message by the failure policy and never touch this state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health of the consumption loop
///
/// # State Machine
///
/// ```text
///              poll error                 poll error (count <= limit)
/// ┌─────────┐ ───────────► ┌─────────┐ ◄─────────────────┐
/// │ Healthy │              │ Backoff │ ──────────────────┘
/// └─────────┘ ◄─────────── └─────────┘
///              poll ok          │ poll error (count > limit)
///                               ▼
///                          ┌─────────┐
///                          │  Fatal  │  (terminal)
///                          └─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionHealth {
    /// Last poll succeeded
    Healthy,

    /// Recent polls failed, waiting before the next attempt
    Backoff,

    /// Retry limit exceeded, the consumer must stop
    Fatal,
}

impl std::fmt::Display for ConsumptionHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Backoff => write!(f, "backoff"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// What the loop should do after a consumption error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `wait`, then poll again; `attempt` is the consecutive failure count
    Retry { attempt: u32, wait: Duration },

    /// Stop consuming; `attempts` failed polls in a row
    Fatal { attempts: u32 },
}

/// Bounded retry state for the consumption loop
///
/// Uses a fixed wait between attempts. Owned by the loop task alone.
///
/// # Example
///
/// ```
/// use everruns_consumer::reliability::{RetryDecision, RetryGovernor};
/// use std::time::Duration;
///
/// let mut governor = RetryGovernor::new(1, Duration::from_secs(5));
/// assert_eq!(
///     governor.record_failure(),
///     RetryDecision::Retry { attempt: 1, wait: Duration::from_secs(5) }
/// );
/// assert_eq!(governor.record_failure(), RetryDecision::Fatal { attempts: 2 });
/// ```
#[derive(Debug, Clone)]
pub struct RetryGovernor {
    retry_limit: u32,
    retry_wait: Duration,
    failures: u32,
    health: ConsumptionHealth,
}

impl RetryGovernor {
    /// Allow `retry_limit` retries after the first failure, `retry_wait` apart
    pub fn new(retry_limit: u32, retry_wait: Duration) -> Self {
        Self {
            retry_limit,
            retry_wait,
            failures: 0,
            health: ConsumptionHealth::Healthy,
        }
    }

    pub fn health(&self) -> ConsumptionHealth {
        self.health
    }

    /// Consecutive failed polls
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Record a failed poll
    pub fn record_failure(&mut self) -> RetryDecision {
        if self.health == ConsumptionHealth::Fatal {
            return RetryDecision::Fatal {
                attempts: self.failures,
            };
        }

        self.failures = self.failures.saturating_add(1);
        if self.failures > self.retry_limit {
            self.health = ConsumptionHealth::Fatal;
            RetryDecision::Fatal {
                attempts: self.failures,
            }
        } else {
            self.health = ConsumptionHealth::Backoff;
            RetryDecision::Retry {
                attempt: self.failures,
                wait: self.retry_wait,
            }
        }
    }

    /// Record a successful poll, clearing the failure count
    ///
    /// Has no effect once fatal.
    pub fn record_success(&mut self) {
        if self.health != ConsumptionHealth::Fatal {
            self.failures = 0;
            self.health = ConsumptionHealth::Healthy;
        }
    }
}
