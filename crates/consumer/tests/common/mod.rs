//! Shared test doubles for consumer integration tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use everruns_consumer::{AckToken, Batch, MessageEnvelope, PollRequest, QueueSource, SourceError};

/// Build a batch of `count` envelopes with ids `{prefix}-{i}`
pub fn batch(prefix: &str, count: usize) -> Batch {
    (0..count)
        .map(|i| {
            MessageEnvelope::new(
                format!("{prefix}-{i}"),
                format!("payload {i}"),
                AckToken::new(format!("{prefix}-token-{i}")),
            )
            .with_source("scripted")
        })
        .collect::<Vec<_>>()
        .into()
}

pub fn transport_error() -> SourceError {
    SourceError::Transport("connection refused".to_string())
}

/// Queue source that replays scripted poll results and records every call
///
/// A scripted batch larger than the poll request is split: the remainder is
/// delivered by the next poll. Once the script runs out, polls behave like
/// an idle long poll: they wait `request.wait` and return an empty batch.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Batch, SourceError>>>,
    always_fail: bool,
    fail_acks: bool,
    cancel_on_delivery: Option<CancellationToken>,
    requested: Mutex<Vec<usize>>,
    ack_attempts: AtomicUsize,
    polls: Mutex<Vec<Instant>>,
    acks: Mutex<Vec<AckToken>>,
    nacks: Mutex<Vec<AckToken>>,
    outstanding: Mutex<HashSet<AckToken>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Batch, SourceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            always_fail: false,
            fail_acks: false,
            cancel_on_delivery: None,
            requested: Mutex::new(Vec::new()),
            ack_attempts: AtomicUsize::new(0),
            polls: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            nacks: Mutex::new(Vec::new()),
            outstanding: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// A source whose every poll fails with a transport error
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new(vec![])
        }
    }

    /// Every `ack` call fails with a transport error
    pub fn with_failing_acks(mut self) -> Self {
        self.fail_acks = true;
        self
    }

    /// Cancel `token` when a non-empty batch is handed out
    pub fn with_cancel_on_delivery(mut self, token: CancellationToken) -> Self {
        self.cancel_on_delivery = Some(token);
        self
    }

    /// `max_messages` of every poll request, in order
    pub fn requested_sizes(&self) -> Vec<usize> {
        self.requested.lock().clone()
    }

    pub fn ack_attempts(&self) -> usize {
        self.ack_attempts.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.lock().len()
    }

    pub fn poll_times(&self) -> Vec<Instant> {
        self.polls.lock().clone()
    }

    pub fn acks(&self) -> Vec<AckToken> {
        self.acks.lock().clone()
    }

    pub fn nacks(&self) -> Vec<AckToken> {
        self.nacks.lock().clone()
    }

    pub fn resolved_count(&self) -> usize {
        self.acks.lock().len() + self.nacks.lock().len()
    }

    /// Called by test handlers when they start on an envelope
    ///
    /// Paired with the ack/nack for that envelope, this measures the window
    /// from dispatch to terminal decision.
    pub fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn resolve(&self, token: &AckToken) -> Result<(), SourceError> {
        if !self.outstanding.lock().remove(token) {
            return Err(SourceError::InvalidToken(token.clone()));
        }
        // Envelopes released without reaching a handler never entered.
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }
}

#[async_trait]
impl QueueSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn poll(&self, request: &PollRequest) -> Result<Batch, SourceError> {
        self.polls.lock().push(Instant::now());
        self.requested.lock().push(request.max_messages);

        if self.always_fail {
            return Err(transport_error());
        }

        let next = {
            let mut script = self.script.lock();
            match script.pop_front() {
                Some(Ok(batch)) if batch.len() > request.max_messages => {
                    let mut envelopes: Vec<_> = batch.into_iter().collect();
                    let rest = envelopes.split_off(request.max_messages);
                    script.push_front(Ok(rest.into()));
                    Some(Ok(Batch::from(envelopes)))
                }
                next => next,
            }
        };
        match next {
            Some(Ok(batch)) => {
                {
                    let mut outstanding = self.outstanding.lock();
                    for envelope in batch.iter() {
                        outstanding.insert(envelope.ack_token().clone());
                    }
                }
                if let Some(token) = &self.cancel_on_delivery {
                    if !batch.is_empty() {
                        token.cancel();
                    }
                }
                Ok(batch)
            }
            Some(Err(e)) => Err(e),
            None => {
                tokio::time::sleep(request.wait.max(Duration::from_millis(1))).await;
                Ok(Batch::empty())
            }
        }
    }

    async fn ack(&self, token: &AckToken) -> Result<(), SourceError> {
        self.ack_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_acks {
            return Err(transport_error());
        }
        self.resolve(token)?;
        self.acks.lock().push(token.clone());
        Ok(())
    }

    async fn nack(&self, token: &AckToken) -> Result<(), SourceError> {
        self.resolve(token)?;
        self.nacks.lock().push(token.clone());
        Ok(())
    }
}

/// Poll `condition` on virtual time until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(600);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
