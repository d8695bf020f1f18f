//! The event queue and its consumer seam.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use strand_store::{Event, EventStatus, EventStore};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Consumer seam
// ---------------------------------------------------------------------------

/// Downstream handler for drained events.
///
/// A consumer failure marks the event `Failed` and the sweep continues;
/// it never aborts the drain or propagates to the producer.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn consume(&self, event: &Event) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Input for [`EventQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueInput {
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    pub metadata: Value,
}

impl EnqueueInput {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            event_type: event_type.into(),
            payload,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

struct Inner {
    store: Arc<dyn EventStore>,
    consumer: RwLock<Option<Arc<dyn EventConsumer>>>,
    draining: AtomicBool,
}

/// Clears the sweep guard however the sweep ends: normal return,
/// unwind, or the future being dropped at an await point.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The intake queue. Cheap to clone; all clones share one sweep guard.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

impl EventQueue {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                consumer: RwLock::new(None),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Register the consumer drained events are handed to.
    ///
    /// Last write wins. Events enqueued before registration stay
    /// pending until the next drain.
    pub fn register_consumer(&self, consumer: Arc<dyn EventConsumer>) {
        *self
            .inner
            .consumer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(consumer);
    }

    fn consumer(&self) -> Option<Arc<dyn EventConsumer>> {
        self.inner
            .consumer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persist a pending event and kick off a drain in the background.
    ///
    /// Returns as soon as the event is durable; processing happens on a
    /// spawned task. When a sweep is already active the new event is
    /// picked up by that sweep's re-fetch loop.
    pub async fn enqueue(&self, input: EnqueueInput) -> Result<Event> {
        let event = Event::new(input.source, input.event_type, input.payload, input.metadata);
        let event = self.inner.store.insert_event(event).await?;
        info!(
            event_id = %event.id,
            event_source = %event.source,
            event_type = %event.event_type,
            "event enqueued"
        );

        if self.consumer().is_some() {
            let queue = self.clone();
            tokio::spawn(async move {
                if let Err(err) = queue.drain().await {
                    warn!(error = %err, "background drain failed");
                }
            });
        }

        Ok(event)
    }

    /// Drain pending events through the registered consumer.
    ///
    /// Single-flight: a call while a sweep is active is a no-op
    /// returning 0. Returns the number of events processed.
    pub async fn drain(&self) -> Result<usize> {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("drain already in flight");
            return Ok(0);
        }

        let _guard = SweepGuard(&self.inner.draining);
        self.drain_locked().await
    }

    async fn drain_locked(&self) -> Result<usize> {
        let Some(consumer) = self.consumer() else {
            return Ok(0);
        };

        let mut processed = 0usize;
        loop {
            let pending = self.inner.store.list_pending_events().await?;
            if pending.is_empty() {
                break;
            }

            for event in pending {
                let event = self
                    .inner
                    .store
                    .set_event_status(event.id, EventStatus::Processing)
                    .await?;

                match consumer.consume(&event).await {
                    Ok(()) => {
                        self.inner
                            .store
                            .set_event_status(event.id, EventStatus::Completed)
                            .await?;
                        debug!(event_id = %event.id, "event completed");
                    }
                    Err(err) => {
                        warn!(event_id = %event.id, error = %err, "consumer failed, event marked failed");
                        self.inner
                            .store
                            .set_event_status(event.id, EventStatus::Failed)
                            .await?;
                    }
                }
                processed += 1;
            }
        }

        if processed > 0 {
            info!(processed, "drain sweep finished");
        }
        Ok(processed)
    }

    /// Whether a sweep is currently active.
    pub fn is_busy(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    pub async fn count_pending(&self) -> Result<usize> {
        Ok(self.inner.store.count_pending_events().await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
