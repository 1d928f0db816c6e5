//! Consumer error type

use super::config::ConfigError;
use crate::source::SourceError;

/// Errors surfaced by a [`Consumer`](super::Consumer) to its host
///
/// Handler failures never appear here; they are resolved per message.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Configuration rejected at construction
    #[error("invalid consumer configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// `start` called while the consumer is running
    #[error("consumer is already running")]
    AlreadyRunning,

    /// `start` called after the consumer stopped or failed
    #[error("consumer has terminated and cannot be restarted")]
    Terminated,

    /// Polling kept failing past the retry limit
    #[error("queue consumption failed after {attempts} attempts: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: SourceError,
    },
}

impl ConsumerError {
    /// Whether this is the terminal consumption failure
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
