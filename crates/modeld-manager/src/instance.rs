//! Live model instances
//!
//! One [`Instance`] exists per resolved model id. It exclusively owns its
//! backend and serializes generations: a bounded FIFO admission queue feeds a
//! single in-flight generation slot. A request that is cancelled while
//! queued is dequeued without ever touching the backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use modeld_core::{
    BoxTokenStream, GenParams, InstanceState, InstanceStatus, ModeldError, Result,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio_util::sync::CancellationToken;

use crate::backend::ModelBackend;

/// Held for the duration of one generation; dropping it releases both the
/// in-flight slot and the queue slot.
#[derive(Debug)]
pub struct GenPermit {
    _queue: OwnedSemaphorePermit,
    _gen: OwnedSemaphorePermit,
}

/// A live binding between a model id and a running backend.
pub struct Instance {
    model_id: String,
    backend: Box<dyn ModelBackend>,
    state: watch::Sender<InstanceState>,
    fail_reason: parking_lot::Mutex<Option<String>>,
    queue: Arc<Semaphore>,
    generation: Arc<Semaphore>,
    max_queue_depth: usize,
    max_wait: Duration,
    last_used: parking_lot::Mutex<Instant>,
    loaded_at: parking_lot::Mutex<Option<Instant>>,
}

impl Instance {
    /// Create an instance in `Loading` state.
    pub fn new(
        model_id: impl Into<String>,
        backend: Box<dyn ModelBackend>,
        max_queue_depth: usize,
        max_wait: Duration,
    ) -> Self {
        let (state, _) = watch::channel(InstanceState::Loading);
        Self {
            model_id: model_id.into(),
            backend,
            state,
            fail_reason: parking_lot::Mutex::new(None),
            queue: Arc::new(Semaphore::new(max_queue_depth)),
            generation: Arc::new(Semaphore::new(1)),
            max_queue_depth,
            max_wait,
            last_used: parking_lot::Mutex::new(Instant::now()),
            loaded_at: parking_lot::Mutex::new(None),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn state(&self) -> InstanceState {
        *self.state.borrow()
    }

    /// Start the backend. Called exactly once by the loading caller.
    pub async fn start_backend(&self) -> Result<()> {
        self.backend.start().await
    }

    pub(crate) fn mark_ready(&self) {
        *self.loaded_at.lock() = Some(Instant::now());
        self.state.send_replace(InstanceState::Ready);
    }

    pub(crate) fn mark_failed(&self, reason: impl Into<String>) {
        *self.fail_reason.lock() = Some(reason.into());
        self.state.send_replace(InstanceState::Failed);
    }

    /// Block until an in-flight load settles, then report its outcome.
    ///
    /// Concurrent callers for the same id all land here, so one `start()`
    /// serves every waiter (single-flight).
    pub async fn wait_until_loaded(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|s| !matches!(s, InstanceState::Loading))
            .await
            .map(|s| *s)
            .unwrap_or(InstanceState::Stopped);
        match settled {
            InstanceState::Ready => Ok(()),
            InstanceState::Failed => {
                let reason = self
                    .fail_reason
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                Err(ModeldError::load_failed(&self.model_id, reason))
            }
            _ => Err(ModeldError::load_failed(
                &self.model_id,
                "instance was stopped while loading",
            )),
        }
    }

    /// Record a use for LRU accounting.
    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    pub fn loaded_at(&self) -> Option<Instant> {
        *self.loaded_at.lock()
    }

    /// True while any request holds a queue slot (queued or generating).
    /// Busy instances are never eviction victims.
    pub fn is_busy(&self) -> bool {
        self.queue.available_permits() < self.max_queue_depth
    }

    pub fn inflight(&self) -> usize {
        1 - self.generation.available_permits()
    }

    pub fn queue_len(&self) -> usize {
        let held = self.max_queue_depth - self.queue.available_permits();
        held.saturating_sub(self.inflight())
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            model_id: self.model_id.clone(),
            state: self.state(),
            idle_secs: self.last_used().elapsed().as_secs(),
            queue_len: self.queue_len(),
            inflight: self.inflight(),
        }
    }

    /// Reserve a queue slot, then the single in-flight slot, FIFO.
    ///
    /// Fails with `TooBusy` when the queue is full or the wait exceeds
    /// `max_wait`, and with `Cancelled` when the caller gives up first — in
    /// which case the backend is never invoked for this request.
    pub async fn begin_generation(&self, cancel: &CancellationToken) -> Result<GenPermit> {
        let queue = tokio::select! {
            _ = cancel.cancelled() => return Err(ModeldError::Cancelled),
            acquired = tokio::time::timeout(self.max_wait, self.queue.clone().acquire_owned()) => {
                match acquired {
                    Err(_) => return Err(ModeldError::too_busy(&self.model_id)),
                    Ok(Err(_)) => return Err(ModeldError::Closed),
                    Ok(Ok(permit)) => permit,
                }
            }
        };
        let generation = tokio::select! {
            _ = cancel.cancelled() => return Err(ModeldError::Cancelled),
            acquired = tokio::time::timeout(self.max_wait, self.generation.clone().acquire_owned()) => {
                match acquired {
                    Err(_) => return Err(ModeldError::too_busy(&self.model_id)),
                    Ok(Err(_)) => return Err(ModeldError::Closed),
                    Ok(Ok(permit)) => permit,
                }
            }
        };
        self.touch();
        Ok(GenPermit { _queue: queue, _gen: generation })
    }

    /// Run one generation against the owned backend. Callers must hold a
    /// [`GenPermit`] for the full life of the returned stream.
    pub async fn generate(
        &self,
        prompt: &str,
        params: GenParams,
        cancel: CancellationToken,
    ) -> Result<BoxTokenStream> {
        self.backend.generate(prompt, params, cancel).await
    }

    /// Stop the backend and close admission. Idempotent.
    pub async fn stop(&self) {
        self.state.send_replace(InstanceState::Stopping);
        // Queued-but-unserviced waiters fail fast instead of generating
        // against a dead backend.
        self.queue.close();
        self.generation.close();
        self.backend.stop().await;
        self.state.send_replace(InstanceState::Stopped);
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("model_id", &self.model_id)
            .field("state", &self.state())
            .field("queue_len", &self.queue_len())
            .field("inflight", &self.inflight())
            .finish()
    }
}
