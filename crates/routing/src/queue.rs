//! Single-lane inbound queue.
//!
//! Every session worker pushes into the same queue. One drain task at a time
//! pops and fully processes envelopes in FIFO order; pushes while a drain is
//! running only grow the list. The drain task exits when the list is empty
//! and the next push starts a new one.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    switchboard_channels::{InboundEnvelope, InboundSink},
    tokio::sync::Notify,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, gauge, routing as routing_metrics};

use crate::Result;

/// Consumer side of the queue: handles one envelope to completion.
#[async_trait]
pub trait InboundProcessor: Send + Sync {
    async fn process(&self, envelope: InboundEnvelope) -> Result<()>;
}

struct QueueInner {
    pending: Mutex<VecDeque<InboundEnvelope>>,
    draining: AtomicBool,
    idle: Notify,
    processor: Arc<dyn InboundProcessor>,
}

#[derive(Clone)]
pub struct InboundQueue {
    inner: Arc<QueueInner>,
}

impl InboundQueue {
    pub fn new(processor: Arc<dyn InboundProcessor>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                idle: Notify::new(),
                processor,
            }),
        }
    }

    /// Envelopes waiting to be processed, excluding the one in flight.
    pub fn len(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing pending and no drain task running.
    pub fn is_idle(&self) -> bool {
        !self.inner.draining.load(Ordering::Acquire) && self.is_empty()
    }

    /// Wait until everything pushed so far has been processed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn start_drain(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        spawn_drain(Arc::clone(&self.inner));
    }
}

/// Run a drain task. The caller must have set `draining`.
fn spawn_drain(inner: Arc<QueueInner>) {
    tokio::spawn(async move {
        let mut guard = DrainGuard {
            inner: Arc::clone(&inner),
            finished: false,
        };
        inner.drain().await;
        guard.finished = true;
    });
}

/// Hands the lane over when a drain task dies mid-envelope, e.g. because the
/// processor panicked. Without it `draining` would stay set and no later push
/// could start a drain.
struct DrainGuard {
    inner: Arc<QueueInner>,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("inbound drain task died, releasing the lane");
        self.inner.draining.store(false, Ordering::Release);
        if self.inner.pending().is_empty() {
            self.inner.idle.notify_waiters();
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok()
            && self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            spawn_drain(Arc::clone(&self.inner));
        }
    }
}

impl QueueInner {
    fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<InboundEnvelope>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pop(&self) -> Option<InboundEnvelope> {
        let mut pending = self.pending();
        let next = pending.pop_front();
        #[cfg(feature = "metrics")]
        gauge!(routing_metrics::QUEUE_DEPTH).set(pending.len() as f64);
        next
    }

    async fn drain(&self) {
        loop {
            while let Some(envelope) = self.pop() {
                let session = envelope.session.clone();
                let message_id = envelope.message.message_id.clone();
                match self.processor.process(envelope).await {
                    Ok(()) => {
                        #[cfg(feature = "metrics")]
                        counter!(routing_metrics::INBOUND_PROCESSED_TOTAL).increment(1);
                    },
                    Err(e) => {
                        #[cfg(feature = "metrics")]
                        counter!(routing_metrics::INBOUND_ERRORS_TOTAL).increment(1);
                        warn!(session = %session, message_id = %message_id, error = %e, "inbound processing failed");
                    },
                }
            }

            self.draining.store(false, Ordering::Release);
            // A push may have landed between the last pop and clearing the
            // flag; its own start_drain saw `draining == true` and returned.
            if self.pending().is_empty()
                || self
                    .draining
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                break;
            }
        }
        debug!("inbound queue drained");
        self.idle.notify_waiters();
    }
}

impl InboundSink for InboundQueue {
    fn push(&self, envelope: InboundEnvelope) {
        {
            let mut pending = self.inner.pending();
            pending.push_back(envelope);
            #[cfg(feature = "metrics")]
            gauge!(routing_metrics::QUEUE_DEPTH).set(pending.len() as f64);
        }
        self.start_drain();
    }
}
