//! In-memory implementation of QueueSource for testing

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use super::queue::{PollRequest, QueueSource, SourceError};
use crate::message::{AckToken, Batch, MessageEnvelope};

/// A message moved aside after exceeding the receive limit
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: String,
    pub payload: Bytes,
    pub receive_count: u32,
}

/// Internal message state
struct StoredMessage {
    id: String,
    payload: Bytes,
    attributes: HashMap<String, String>,
    receive_count: u32,
    delivery: Option<Delivery>,
}

/// Outstanding delivery of a stored message
struct Delivery {
    token: AckToken,
    visible_at: Instant,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        match &self.delivery {
            Some(delivery) => delivery.visible_at <= now,
            None => true,
        }
    }

    fn holds_live_token(&self, token: &AckToken, now: Instant) -> bool {
        matches!(&self.delivery, Some(d) if &d.token == token && d.visible_at > now)
    }
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    dead_letters: Vec<DeadLetter>,
    closed: bool,
}

impl QueueState {
    fn position_of(&self, token: &AckToken, now: Instant) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.holds_live_token(token, now))
    }

    /// Earliest instant at which a hidden message becomes visible again
    fn next_expiry(&self, now: Instant) -> Option<Instant> {
        self.messages
            .iter()
            .filter_map(|m| m.delivery.as_ref().map(|d| d.visible_at))
            .filter(|at| *at > now)
            .min()
    }
}

/// In-memory at-least-once queue
///
/// Behaves like a hosted queue with visibility timeouts: polled messages are
/// hidden for the requested visibility timeout and reappear if they are not
/// acknowledged in time. Each delivery gets a fresh ack token, and tokens of
/// expired deliveries are rejected.
///
/// # Example
///
/// ```
/// use everruns_consumer::source::InMemoryQueue;
///
/// let queue = InMemoryQueue::new("orders").with_max_receive_count(5);
/// queue.send("hello");
/// assert_eq!(queue.len(), 1);
/// ```
pub struct InMemoryQueue {
    name: String,
    max_receive_count: Option<u32>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_receive_count: None,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Dead-letter messages that have already been received `count` times
    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = Some(count.max(1));
        self
    }

    /// Enqueue a message and return its id
    pub fn send(&self, payload: impl Into<Bytes>) -> String {
        self.send_with_attributes(payload, HashMap::new())
    }

    /// Enqueue a message with attributes and return its id
    pub fn send_with_attributes(
        &self,
        payload: impl Into<Bytes>,
        attributes: HashMap<String, String>,
    ) -> String {
        let id = Uuid::now_v7().to_string();
        self.state.lock().messages.push_back(StoredMessage {
            id: id.clone(),
            payload: payload.into(),
            attributes,
            receive_count: 0,
            delivery: None,
        });
        self.notify.notify_waiters();
        id
    }

    /// Messages still in the queue, visible or in flight
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages available for delivery right now
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.is_visible(now))
            .count()
    }

    /// Messages delivered and still hidden
    pub fn in_flight_len(&self) -> usize {
        self.len() - self.visible_len()
    }

    /// Messages moved aside by the receive limit
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead_letters.clone()
    }

    /// Reject every subsequent call with [`SourceError::Closed`]
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Deliver up to `request.max_messages` visible messages
    fn take_visible(
        &self,
        state: &mut QueueState,
        now: Instant,
        request: &PollRequest,
    ) -> Vec<MessageEnvelope> {
        let mut delivered = Vec::new();
        let mut index = 0;

        while index < state.messages.len() && delivered.len() < request.max_messages {
            let message = &state.messages[index];
            if !message.is_visible(now) {
                index += 1;
                continue;
            }

            let exhausted = self
                .max_receive_count
                .is_some_and(|max| message.receive_count >= max);
            if exhausted {
                if let Some(message) = state.messages.remove(index) {
                    debug!(
                        queue = %self.name,
                        message_id = %message.id,
                        receive_count = message.receive_count,
                        "Moving message to dead letters"
                    );
                    state.dead_letters.push(DeadLetter {
                        message_id: message.id,
                        payload: message.payload,
                        receive_count: message.receive_count,
                    });
                }
                continue;
            }

            let message = &mut state.messages[index];
            let token = AckToken::new(Uuid::now_v7().to_string());
            message.receive_count += 1;
            message.delivery = Some(Delivery {
                token: token.clone(),
                visible_at: now + request.visibility_timeout,
            });

            delivered.push(
                MessageEnvelope::new(message.id.clone(), message.payload.clone(), token)
                    .with_attributes(message.attributes.clone())
                    .with_receive_count(message.receive_count)
                    .with_source(self.name.clone()),
            );
            index += 1;
        }

        delivered
    }
}

#[async_trait]
impl QueueSource for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, request: &PollRequest) -> Result<Batch, SourceError> {
        let deadline = Instant::now() + request.wait;

        loop {
            // Register for wakeups before inspecting state so a send between
            // the check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let next_expiry = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(SourceError::Closed);
                }
                let delivered = self.take_visible(&mut state, now, request);
                if !delivered.is_empty() {
                    trace!(queue = %self.name, count = delivered.len(), "Delivered messages");
                    return Ok(Batch::new(delivered));
                }
                state.next_expiry(now)
            };

            if now >= deadline {
                return Ok(Batch::empty());
            }

            let wake_at = next_expiry.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, token: &AckToken) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SourceError::Closed);
        }
        let index = state
            .position_of(token, Instant::now())
            .ok_or_else(|| SourceError::InvalidToken(token.clone()))?;
        state.messages.remove(index);
        Ok(())
    }

    async fn nack(&self, token: &AckToken) -> Result<(), SourceError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SourceError::Closed);
            }
            let index = state
                .position_of(token, Instant::now())
                .ok_or_else(|| SourceError::InvalidToken(token.clone()))?;
            state.messages[index].delivery = None;
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
