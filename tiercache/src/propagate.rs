//! Bounded propagation queue with a single owned consumer
//!
//! Used by the chain cache for backfills and by the loadable cache for
//! write-backs. Messages are applied strictly in enqueue order by one
//! background task. The queue is bounded; what happens when it is full is
//! decided by [`BackpressurePolicy`].

use crate::error::{CacheError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a producer does when the propagation queue is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for the consumer to free a slot
    #[default]
    Block,
    /// Discard the new message and count it as dropped
    DropNewest,
}

enum Envelope<M> {
    Message(M),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of propagation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropagationStats {
    pub enqueued: u64,
    pub applied: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Bounded queue drained by exactly one background task
pub struct Propagator<M> {
    name: &'static str,
    tx: mpsc::Sender<Envelope<M>>,
    policy: BackpressurePolicy,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl<M> Propagator<M>
where
    M: Send + 'static,
{
    /// Spawn the consumer task. Must be called from within a Tokio runtime.
    ///
    /// `handler` is invoked once per message, in enqueue order. A failed
    /// handler is logged and counted; the message is not retried.
    pub fn spawn<H, Fut>(
        name: &'static str,
        capacity: usize,
        policy: BackpressurePolicy,
        handler: H,
    ) -> Self
    where
        H: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let capacity = capacity.max(1);
        info!(
            "Starting {} worker (capacity={}, policy={:?})",
            name, capacity, policy
        );

        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(Self::worker_loop(
            name,
            rx,
            handler,
            Arc::clone(&counters),
        ));

        Self {
            name,
            tx,
            policy,
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    async fn worker_loop<H, Fut>(
        name: &'static str,
        mut rx: mpsc::Receiver<Envelope<M>>,
        handler: H,
        counters: Arc<Counters>,
    ) where
        H: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        while let Some(envelope) = rx.recv().await {
            match envelope {
                Envelope::Message(message) => {
                    Self::apply(name, &handler, &counters, message).await;
                }
                Envelope::Flush(ack) => {
                    let _ = ack.send(());
                }
                Envelope::Shutdown => {
                    // Refuse new messages, then drain whatever is already queued
                    rx.close();
                }
            }
        }

        debug!("{} worker stopped", name);
    }

    async fn apply<H, Fut>(name: &'static str, handler: &H, counters: &Counters, message: M)
    where
        H: Fn(M) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match handler(message).await {
            Ok(()) => {
                counters.applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("{} failed to apply message: {}", name, e);
            }
        }
    }

    /// Queue a message. Returns false when it was dropped or the queue is closed.
    pub async fn enqueue(&self, message: M) -> bool {
        if self.closed.load(Ordering::Acquire) {
            debug!("{} closed, discarding message", self.name);
            return false;
        }

        let accepted = match self.policy {
            BackpressurePolicy::Block => self.tx.send(Envelope::Message(message)).await.is_ok(),
            BackpressurePolicy::DropNewest => {
                match self.tx.try_send(Envelope::Message(message)) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("{} queue full, dropping message", self.name);
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            }
        };

        if accepted {
            self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Wait until every message enqueued before this call has been applied
    pub async fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) && self.worker.lock().is_none() {
            // Already drained by close
            return Ok(());
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Envelope::Flush(ack_tx))
            .await
            .map_err(|_| CacheError::Closed)?;
        ack_rx.await.map_err(|_| CacheError::Closed)
    }

    /// Stop accepting messages, drain the queue and join the worker.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        let _ = self.tx.send(Envelope::Shutdown).await;
        if let Err(e) = handle.await {
            warn!("{} worker ended abnormally: {}", self.name, e);
        }
        info!("{} worker closed", self.name);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn stats(&self) -> PropagationStats {
        PropagationStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}
