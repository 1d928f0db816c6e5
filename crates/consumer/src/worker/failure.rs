//! Failure policy: decides ack or nack for each handler outcome

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::handler::HandlerError;
use crate::message::MessageEnvelope;
use crate::source::{QueueSource, SourceError};

/// What to do with a message whose handler returned an error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Acknowledge anyway; the message is discarded
    Ack,

    /// Requeue for redelivery; the queue's own dead-letter policy bounds retries
    #[default]
    Nack,
}

impl fmt::Display for FailureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Nack => write!(f, "nack"),
        }
    }
}

/// Error parsing a [`FailureStrategy`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown failure strategy '{0}', expected 'ack' or 'nack'")]
pub struct ParseFailureStrategyError(String);

impl FromStr for FailureStrategy {
    type Err = ParseFailureStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ack" => Ok(Self::Ack),
            "nack" => Ok(Self::Nack),
            other => Err(ParseFailureStrategyError(other.to_string())),
        }
    }
}

/// Terminal decision for one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack,
}

impl fmt::Display for AckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Nack => write!(f, "nack"),
        }
    }
}

/// Resolves handler outcomes into ack/nack calls
///
/// This policy never counts handler retries. Redelivery limits belong to
/// the queue, so a poisoned message cannot stall consumption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePolicy {
    strategy: FailureStrategy,
}

impl FailurePolicy {
    pub fn new(strategy: FailureStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> FailureStrategy {
        self.strategy
    }

    /// Decide what to do with a handler outcome
    ///
    /// Success always acks. Failure follows the configured strategy.
    pub fn resolve(&self, outcome: &Result<(), HandlerError>) -> AckDecision {
        match (outcome, self.strategy) {
            (Ok(()), _) => AckDecision::Ack,
            (Err(_), FailureStrategy::Ack) => AckDecision::Ack,
            (Err(_), FailureStrategy::Nack) => AckDecision::Nack,
        }
    }

    /// Resolve the outcome and issue the matching call against the source
    ///
    /// Consumes the envelope: the decision is terminal and issued once.
    pub async fn settle(
        &self,
        source: &dyn QueueSource,
        envelope: MessageEnvelope,
        outcome: &Result<(), HandlerError>,
    ) -> Result<AckDecision, SourceError> {
        let decision = self.resolve(outcome);
        match decision {
            AckDecision::Ack => source.ack(envelope.ack_token()).await?,
            AckDecision::Nack => source.nack(envelope.ack_token()).await?,
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::source::{InMemoryQueue, PollRequest};

    #[test]
    fn test_success_always_acks() {
        for strategy in [FailureStrategy::Ack, FailureStrategy::Nack] {
            let policy = FailurePolicy::new(strategy);
            assert_eq!(policy.resolve(&Ok(())), AckDecision::Ack);
        }
    }

    #[test]
    fn test_failure_follows_strategy() {
        let failed = Err(HandlerError::new("boom"));
        assert_eq!(
            FailurePolicy::new(FailureStrategy::Ack).resolve(&failed),
            AckDecision::Ack
        );
        assert_eq!(
            FailurePolicy::new(FailureStrategy::Nack).resolve(&failed),
            AckDecision::Nack
        );
    }

    #[test]
    fn test_default_strategy_is_nack() {
        assert_eq!(FailurePolicy::default().strategy(), FailureStrategy::Nack);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("ack".parse::<FailureStrategy>(), Ok(FailureStrategy::Ack));
        assert_eq!(" NACK ".parse::<FailureStrategy>(), Ok(FailureStrategy::Nack));
        assert!("exit".parse::<FailureStrategy>().is_err());
    }

    #[test]
    fn test_strategy_serialization() {
        let json = serde_json::to_string(&FailureStrategy::Ack).unwrap();
        assert_eq!(json, "\"ack\"");
        let parsed: FailureStrategy = serde_json::from_str("\"nack\"").unwrap();
        assert_eq!(parsed, FailureStrategy::Nack);
    }

    #[tokio::test]
    async fn test_settle_issues_decision_against_source() {
        let queue = InMemoryQueue::new("orders");
        queue.send("a");
        queue.send("b");
        let request = PollRequest {
            max_messages: 2,
            wait: Duration::ZERO,
            visibility_timeout: Duration::from_secs(30),
        };
        let mut batch = queue.poll(&request).await.unwrap().into_iter();
        let first = batch.next().unwrap();
        let second = batch.next().unwrap();

        let policy = FailurePolicy::new(FailureStrategy::Nack);
        let acked = policy.settle(&queue, first, &Ok(())).await.unwrap();
        let nacked = policy
            .settle(&queue, second, &Err(HandlerError::new("boom")))
            .await
            .unwrap();

        assert_eq!(acked, AckDecision::Ack);
        assert_eq!(nacked, AckDecision::Nack);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.visible_len(), 1);
    }
}
