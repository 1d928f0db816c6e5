//! Worker pool for message execution
//!
//! Bounds concurrent handler invocations with a semaphore and tracks
//! in-flight messages so shutdown can wait for them.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info_span, warn, Instrument};

use super::failure::FailurePolicy;
use crate::handler::{HandlerContext, HandlerError, MessageHandler};
use crate::message::MessageEnvelope;
use crate::source::QueueSource;

/// Fixed-size pool of worker slots
///
/// Each slot runs at most one handler at a time. [`WorkerPool::dispatch`]
/// waits for a free slot, so the number of dispatched envelopes without a
/// terminal ack/nack never exceeds the concurrency.
pub struct WorkerPool {
    consumer: Arc<str>,
    source: Arc<dyn QueueSource>,
    handler: Arc<dyn MessageHandler>,
    policy: FailurePolicy,
    concurrency: usize,
    permits: Arc<Semaphore>,
    free_slots: Arc<Mutex<Vec<usize>>>,
    in_flight: Arc<AtomicUsize>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool with `concurrency` slots
    ///
    /// `cancel` is handed to every handler through its context.
    pub fn new(
        consumer: Arc<str>,
        source: Arc<dyn QueueSource>,
        handler: Arc<dyn MessageHandler>,
        policy: FailurePolicy,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        debug_assert!(concurrency > 0, "worker pool needs at least one slot");
        Self {
            consumer,
            source,
            handler,
            policy,
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            free_slots: Arc::new(Mutex::new((0..concurrency).rev().collect())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Envelopes dispatched and not yet resolved
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Slots free right now
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait until at least one slot is free
    ///
    /// Only the dispatching task acquires slots, so a slot seen free here is
    /// still free at the next dispatch.
    pub async fn ready(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            drop(permit);
        }
    }

    /// Hand an envelope to a free slot, waiting while all slots are busy
    ///
    /// Returns the envelope untouched if `shutdown` fires before a slot
    /// frees up.
    pub async fn dispatch(
        &self,
        envelope: MessageEnvelope,
        shutdown: &CancellationToken,
    ) -> Result<(), MessageEnvelope> {
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(envelope),
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Worker pool semaphore closed");
                    return Err(envelope);
                }
            },
        };

        self.spawn(permit, envelope);
        Ok(())
    }

    /// Wait for every dispatched envelope to be resolved
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        debug!(consumer = %self.consumer, "All in-flight messages resolved");
    }

    fn spawn(&self, permit: OwnedSemaphorePermit, envelope: MessageEnvelope) {
        let slot = self.free_slots.lock().pop().unwrap_or_default();
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let span = info_span!(
            "handle_message",
            consumer = %self.consumer,
            message_id = %envelope.message_id(),
            slot,
        );

        let ctx = HandlerContext::new(Arc::clone(&self.consumer), slot, self.cancel.clone());
        let source = Arc::clone(&self.source);
        let handler = Arc::clone(&self.handler);
        let policy = self.policy;
        let free_slots = Arc::clone(&self.free_slots);
        let in_flight = Arc::clone(&self.in_flight);

        self.tracker.spawn(
            async move {
                let outcome = AssertUnwindSafe(handler.handle(&ctx, &envelope))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(HandlerError::panicked(panic_message(&*panic))));

                if let Err(e) = &outcome {
                    warn!(
                        error = %e,
                        receive_count = envelope.receive_count(),
                        strategy = %policy.strategy(),
                        "Handler failed"
                    );
                }

                let message_id = envelope.message_id().to_string();
                match policy.settle(source.as_ref(), envelope, &outcome).await {
                    Ok(decision) => debug!(%decision, "Message resolved"),
                    Err(e) => error!(%message_id, "Failed to resolve message: {}", e),
                }

                // Release
                in_flight.fetch_sub(1, Ordering::SeqCst);
                free_slots.lock().push(slot);
                drop(permit);
            }
            .instrument(span),
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::handler::handler_fn;
    use crate::source::{InMemoryQueue, PollRequest};
    use crate::worker::FailureStrategy;

    struct PanickingHandler;

    #[async_trait]
    impl MessageHandler for PanickingHandler {
        async fn handle(
            &self,
            _ctx: &HandlerContext,
            _message: &MessageEnvelope,
        ) -> Result<(), HandlerError> {
            panic!("handler exploded");
        }
    }

    async fn fetch(queue: &InMemoryQueue, count: usize) -> Vec<MessageEnvelope> {
        for i in 0..count {
            queue.send(format!("m{i}"));
        }
        let request = PollRequest {
            max_messages: count,
            wait: Duration::ZERO,
            visibility_timeout: Duration::from_secs(30),
        };
        queue.poll(&request).await.unwrap().into_iter().collect()
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42u32), "handler panicked");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "at least one slot")]
    fn test_zero_concurrency_is_rejected() {
        WorkerPool::new(
            Arc::from("test"),
            Arc::new(InMemoryQueue::new("orders")),
            Arc::new(handler_fn(|_ctx, _message| async { Ok(()) })),
            FailurePolicy::default(),
            0,
            CancellationToken::new(),
        );
    }

    #[tokio::test]
    async fn test_dispatch_and_drain_acks_messages() {
        let queue = Arc::new(InMemoryQueue::new("orders"));
        let envelopes = fetch(&queue, 3).await;
        let pool = WorkerPool::new(
            Arc::from("test"),
            queue.clone(),
            Arc::new(handler_fn(|_ctx, _message| async { Ok(()) })),
            FailurePolicy::new(FailureStrategy::Nack),
            2,
            CancellationToken::new(),
        );
        let shutdown = CancellationToken::new();

        for envelope in envelopes {
            pool.dispatch(envelope, &shutdown).await.unwrap();
            assert!(pool.in_flight() <= 2);
        }
        pool.drain().await;

        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.available_slots(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_nacked() {
        let queue = Arc::new(InMemoryQueue::new("orders"));
        let envelopes = fetch(&queue, 1).await;
        let pool = WorkerPool::new(
            Arc::from("test"),
            queue.clone(),
            Arc::new(PanickingHandler),
            FailurePolicy::new(FailureStrategy::Nack),
            1,
            CancellationToken::new(),
        );

        for envelope in envelopes {
            pool.dispatch(envelope, &CancellationToken::new()).await.unwrap();
        }
        pool.drain().await;

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.visible_len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_returns_envelope_on_shutdown_when_saturated() {
        let queue = Arc::new(InMemoryQueue::new("orders"));
        let mut envelopes = fetch(&queue, 2).await.into_iter();
        let release = CancellationToken::new();
        let pool = WorkerPool::new(
            Arc::from("test"),
            queue.clone(),
            Arc::new(handler_fn({
                let release = release.clone();
                move |_ctx, _message| {
                    let release = release.clone();
                    async move {
                        release.cancelled().await;
                        Ok(())
                    }
                }
            })),
            FailurePolicy::default(),
            1,
            CancellationToken::new(),
        );
        let shutdown = CancellationToken::new();

        pool.dispatch(envelopes.next().unwrap(), &shutdown)
            .await
            .unwrap();
        assert_eq!(pool.available_slots(), 0);

        shutdown.cancel();
        let rejected = pool
            .dispatch(envelopes.next().unwrap(), &shutdown)
            .await
            .unwrap_err();
        assert_eq!(rejected.payload_str(), Some("m1"));

        release.cancel();
        pool.drain().await;
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_slots_are_distinct_while_busy() {
        let queue = Arc::new(InMemoryQueue::new("orders"));
        let envelopes = fetch(&queue, 3).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = CancellationToken::new();
        let pool = WorkerPool::new(
            Arc::from("test"),
            queue.clone(),
            Arc::new(handler_fn({
                let seen = seen.clone();
                let gate = gate.clone();
                move |ctx, _message| {
                    let seen = seen.clone();
                    let gate = gate.clone();
                    async move {
                        seen.lock().push(ctx.slot());
                        gate.cancelled().await;
                        Ok(())
                    }
                }
            })),
            FailurePolicy::default(),
            3,
            CancellationToken::new(),
        );

        let shutdown = CancellationToken::new();
        for envelope in envelopes {
            pool.dispatch(envelope, &shutdown).await.unwrap();
        }
        while seen.lock().len() < 3 {
            tokio::task::yield_now().await;
        }
        gate.cancel();
        pool.drain().await;

        let mut slots = seen.lock().clone();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
    }
}
