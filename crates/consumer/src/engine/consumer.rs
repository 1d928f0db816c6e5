//! Consumption loop
//!
//! Polls the queue source, dispatches envelopes to the worker pool and
//! governs retries of failed polls.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::component::Component;
use super::config::{ConfigError, ConsumerConfig};
use super::error::ConsumerError;
use crate::handler::MessageHandler;
use crate::message::MessageEnvelope;
use crate::reliability::{ConsumptionHealth, RetryDecision, RetryGovernor};
use crate::source::QueueSource;
use crate::worker::{FailurePolicy, WorkerPool};

/// Consumer lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    /// Built, not started yet
    Idle,
    /// Polling and dispatching
    Running,
    /// No longer polling, waiting for in-flight messages
    Draining,
    /// Shut down after cancellation or `stop`
    Stopped,
    /// Shut down after a fatal consumption error
    Failed,
}

impl std::fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Queue consumer
///
/// Runs once: after `start` returns the consumer cannot be started again.
///
/// # Example
///
/// ```ignore
/// let queue = Arc::new(InMemoryQueue::new("orders"));
/// let consumer = Consumer::new(
///     "orders",
///     queue,
///     Arc::new(handler_fn(|_ctx, message| async move {
///         tracing::info!(payload = ?message.payload_str(), "Received message");
///         Ok(())
///     })),
///     ConsumerConfig::default().with_concurrency(10),
/// )?;
///
/// let cancel = CancellationToken::new();
/// consumer.start(cancel.clone()).await?;
/// ```
pub struct Consumer {
    name: Arc<str>,
    config: ConsumerConfig,
    source: Arc<dyn QueueSource>,
    handler: Arc<dyn MessageHandler>,
    stop_requested: CancellationToken,
    active: Mutex<Option<CancellationToken>>,
    status: watch::Sender<ConsumerStatus>,
}

impl Consumer {
    /// Create a consumer, validating its configuration
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn QueueSource>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Result<Self, ConsumerError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName.into());
        }
        config.validate()?;

        let (status, _) = watch::channel(ConsumerStatus::Idle);

        Ok(Self {
            name: Arc::from(name),
            config,
            source,
            handler,
            stop_requested: CancellationToken::new(),
            active: Mutex::new(None),
            status,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Get current status
    pub fn status(&self) -> ConsumerStatus {
        *self.status.borrow()
    }

    /// Watch status changes, including fatal termination
    pub fn subscribe(&self) -> watch::Receiver<ConsumerStatus> {
        self.status.subscribe()
    }

    /// Run the consumption loop
    ///
    /// Blocks until `cancel` fires, [`Consumer::stop`] is called, or polling
    /// fails more than `consume_retry_limit` times in a row. In every case
    /// in-flight messages are resolved before this returns.
    #[instrument(skip(self, cancel), fields(consumer = %self.name))]
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        let shutdown = cancel.child_token();
        self.begin(&shutdown)?;

        info!(
            source = %self.source.name(),
            concurrency = self.config.concurrency,
            max_messages = self.config.max_messages_per_poll,
            poll_wait_ms = self.config.poll_wait.as_millis() as u64,
            visibility_timeout_ms = self.config.visibility_timeout.as_millis() as u64,
            retry_limit = self.config.consume_retry_limit,
            failure_strategy = %self.config.failure_strategy,
            "Starting consumer"
        );

        let pool = WorkerPool::new(
            Arc::clone(&self.name),
            Arc::clone(&self.source),
            Arc::clone(&self.handler),
            FailurePolicy::new(self.config.failure_strategy),
            self.config.concurrency,
            shutdown.clone(),
        );

        let result = self.consume(&pool, &shutdown).await;

        self.status.send_replace(ConsumerStatus::Draining);
        debug!(in_flight = pool.in_flight(), "Draining in-flight messages");
        pool.drain().await;
        *self.active.lock() = None;

        match &result {
            Ok(()) => {
                self.status.send_replace(ConsumerStatus::Stopped);
                info!("Consumer stopped");
            }
            Err(e) => {
                self.status.send_replace(ConsumerStatus::Failed);
                error!(error = %e, "Consumer terminated");
            }
        }

        result
    }

    /// Request a graceful shutdown
    ///
    /// Polling stops; `start` returns once in-flight messages are resolved.
    /// Calling this before `start` makes `start` return immediately.
    pub fn stop(&self) {
        self.stop_requested.cancel();
        if let Some(shutdown) = self.active.lock().as_ref() {
            info!(consumer = %self.name, "Stop requested");
            shutdown.cancel();
        }
    }

    /// Move from idle to running
    fn begin(&self, shutdown: &CancellationToken) -> Result<(), ConsumerError> {
        {
            let mut active = self.active.lock();
            let status = *self.status.borrow();
            match status {
                ConsumerStatus::Idle => {}
                ConsumerStatus::Running | ConsumerStatus::Draining => {
                    return Err(ConsumerError::AlreadyRunning)
                }
                ConsumerStatus::Stopped | ConsumerStatus::Failed => {
                    return Err(ConsumerError::Terminated)
                }
            }
            *active = Some(shutdown.clone());
            self.status.send_replace(ConsumerStatus::Running);
        }

        if self.stop_requested.is_cancelled() {
            shutdown.cancel();
        }
        Ok(())
    }

    async fn consume(
        &self,
        pool: &WorkerPool,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        let mut governor = RetryGovernor::new(
            self.config.consume_retry_limit,
            self.config.consume_retry_wait,
        );

        loop {
            if shutdown.is_cancelled() {
                debug!("Shutdown requested");
                return Ok(());
            }

            // Never fetch while every slot is busy, nor more than the free slots.
            // Only this loop takes slots, so the count can only grow until dispatch.
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = pool.ready() => {}
            }
            let request = self.config.poll_request(pool.available_slots());

            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                polled = self.source.poll(&request) => polled,
            };

            let batch = match polled {
                Ok(batch) => {
                    if governor.health() == ConsumptionHealth::Backoff {
                        info!(
                            failures = governor.consecutive_failures(),
                            "Queue consumption recovered"
                        );
                    }
                    governor.record_success();
                    batch
                }
                Err(e) => match governor.record_failure() {
                    RetryDecision::Retry { attempt, wait } => {
                        warn!(
                            error = %e,
                            attempt,
                            retry_limit = governor.retry_limit(),
                            wait_ms = wait.as_millis() as u64,
                            "Failed to poll queue, retrying"
                        );
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(wait) => continue,
                        }
                    }
                    RetryDecision::Fatal { attempts } => {
                        error!(error = %e, attempts, "Queue consumption retries exhausted");
                        return Err(ConsumerError::Fatal {
                            attempts,
                            source: e,
                        });
                    }
                },
            };

            if batch.is_empty() {
                trace!("No messages available");
                continue;
            }

            debug!(count = batch.len(), "Received batch");

            let mut pending = batch.into_iter();
            while let Some(envelope) = pending.next() {
                if let Err(envelope) = pool.dispatch(envelope, shutdown).await {
                    self.release(std::iter::once(envelope).chain(pending)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Return fetched but undispatched envelopes to the queue
    async fn release(&self, envelopes: impl Iterator<Item = MessageEnvelope>) {
        for envelope in envelopes {
            match self.source.nack(envelope.ack_token()).await {
                Ok(()) => debug!(
                    message_id = %envelope.message_id(),
                    "Released undispatched message"
                ),
                Err(e) => warn!(
                    message_id = %envelope.message_id(),
                    error = %e,
                    "Failed to release undispatched message"
                ),
            }
        }
    }
}

#[async_trait]
impl Component for Consumer {
    fn name(&self) -> &str {
        Consumer::name(self)
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        Consumer::start(self, cancel).await
    }

    fn stop(&self) {
        Consumer::stop(self)
    }
}
