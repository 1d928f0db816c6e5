//! Consumer configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::PollRequest;
use crate::worker::FailureStrategy;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("consumer name must not be empty")]
    EmptyName,

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("max_messages_per_poll must be at least 1")]
    ZeroMaxMessages,

    #[error("visibility_timeout must be greater than zero")]
    ZeroVisibilityTimeout,
}

/// Consumer configuration
///
/// Immutable once the consumer is built. Defaults:
///
/// | field                   | default |
/// |-------------------------|---------|
/// | `concurrency`           | 1       |
/// | `max_messages_per_poll` | 3       |
/// | `poll_wait`             | 20s     |
/// | `visibility_timeout`    | 30s     |
/// | `consume_retry_limit`   | 3       |
/// | `consume_retry_wait`    | 10s     |
/// | `failure_strategy`      | Nack    |
///
/// The visibility timeout must exceed the expected handler run time,
/// otherwise the queue may redeliver a message that is still being handled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerConfig {
    /// Number of worker slots (in-flight handler invocations)
    pub concurrency: usize,

    /// Maximum envelopes requested per poll
    pub max_messages_per_poll: usize,

    /// How long one poll may wait for messages (long polling)
    #[serde(with = "duration_millis")]
    pub poll_wait: Duration,

    /// How long delivered messages stay hidden from other consumers
    #[serde(with = "duration_millis")]
    pub visibility_timeout: Duration,

    /// Consecutive poll failures tolerated before giving up
    pub consume_retry_limit: u32,

    /// Wait between consumption retries
    #[serde(with = "duration_millis")]
    pub consume_retry_wait: Duration,

    /// What to do with a message whose handler failed
    pub failure_strategy: FailureStrategy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_messages_per_poll: 3,
            poll_wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
            consume_retry_limit: 3,
            consume_retry_wait: Duration::from_secs(10),
            failure_strategy: FailureStrategy::Nack,
        }
    }
}

impl ConsumerConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from environment variables on top of the defaults
    ///
    /// See [`ConsumerConfig::with_env_overrides`] for the variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Replace fields with values from environment variables
    ///
    /// - `CONSUMER_CONCURRENCY`
    /// - `CONSUMER_MAX_MESSAGES`
    /// - `CONSUMER_POLL_WAIT_SECS`
    /// - `CONSUMER_VISIBILITY_TIMEOUT_SECS`
    /// - `CONSUMER_RETRY_LIMIT`
    /// - `CONSUMER_RETRY_WAIT_SECS`
    /// - `CONSUMER_FAILURE_STRATEGY` (`ack` or `nack`)
    ///
    /// Unset or unparsable values keep the current value, so a host can set
    /// its own defaults first.
    pub fn with_env_overrides(self) -> Self {
        Self {
            concurrency: env_parse("CONSUMER_CONCURRENCY").unwrap_or(self.concurrency),
            max_messages_per_poll: env_parse("CONSUMER_MAX_MESSAGES")
                .unwrap_or(self.max_messages_per_poll),
            poll_wait: env_parse("CONSUMER_POLL_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(self.poll_wait),
            visibility_timeout: env_parse("CONSUMER_VISIBILITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(self.visibility_timeout),
            consume_retry_limit: env_parse("CONSUMER_RETRY_LIMIT")
                .unwrap_or(self.consume_retry_limit),
            consume_retry_wait: env_parse("CONSUMER_RETRY_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(self.consume_retry_wait),
            failure_strategy: env_parse("CONSUMER_FAILURE_STRATEGY")
                .unwrap_or(self.failure_strategy),
        }
    }

    /// Set the number of worker slots
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the maximum envelopes per poll
    pub fn with_max_messages_per_poll(mut self, max: usize) -> Self {
        self.max_messages_per_poll = max;
        self
    }

    /// Set the long-poll wait
    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    /// Set the visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Set how many consecutive poll failures are retried
    pub fn with_consume_retry_limit(mut self, limit: u32) -> Self {
        self.consume_retry_limit = limit;
        self
    }

    /// Set the wait between consumption retries
    pub fn with_consume_retry_wait(mut self, wait: Duration) -> Self {
        self.consume_retry_wait = wait;
        self
    }

    /// Set the failure strategy
    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_messages_per_poll == 0 {
            return Err(ConfigError::ZeroMaxMessages);
        }
        if self.visibility_timeout.is_zero() {
            return Err(ConfigError::ZeroVisibilityTimeout);
        }
        Ok(())
    }

    /// Poll parameters handed to the queue source
    ///
    /// Never asks for more envelopes than `free_slots`, so every fetched
    /// envelope goes straight to a worker while its visibility clock runs.
    pub fn poll_request(&self, free_slots: usize) -> PollRequest {
        PollRequest {
            max_messages: self.max_messages_per_poll.min(free_slots).max(1),
            wait: self.poll_wait,
            visibility_timeout: self.visibility_timeout,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
