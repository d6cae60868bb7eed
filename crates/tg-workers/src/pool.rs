//! Worker pool: round-robin dispatch, request correlation, timeouts and
//! teardown.
//!
//! A timeout only fails the caller's future. The worker keeps computing and
//! its late reply is discarded, so timeouts should be sized for the slowest
//! expected request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tg_core::clock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::handler::WorkerKind;
use crate::message::{RequestId, WorkerMessage, WorkerReply, WorkerRequest};
use crate::worker::{PendingMap, WorkerHandle};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Generates `req_<counter>_<epochMillis>` ids; shared across pool
/// generations so ids stay unique for the lifetime of a manager
#[derive(Debug, Clone, Default)]
pub struct RequestIds {
  counter: Arc<AtomicU64>,
}

impl RequestIds {
  pub fn next(&self) -> RequestId {
    let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req_{}_{}", n, clock::now_millis())
  }
}

/// Cheaply cloneable handle to a fixed set of worker threads
#[derive(Clone)]
pub struct WorkerPool {
  inner: Arc<PoolInner>,
}

struct PoolInner {
  kind: WorkerKind,
  workers: Vec<WorkerHandle>,
  next: AtomicUsize,
  pending: Arc<PendingMap>,
  ids: RequestIds,
  timeout: Duration,
  cancel: CancellationToken,
}

impl WorkerPool {
  /// Start `count` workers. Fails as a whole if any worker cannot start.
  pub fn spawn(kind: WorkerKind, count: usize, timeout: Duration, ids: RequestIds) -> Result<Self, WorkerError> {
    let pending = Arc::new(PendingMap::new());
    let cancel = CancellationToken::new();

    let mut workers = Vec::with_capacity(count);
    for id in 0..count {
      match WorkerHandle::spawn(id, kind, pending.clone(), cancel.clone()) {
        Ok(worker) => workers.push(worker),
        Err(e) => {
          // Stop the ones already running
          cancel.cancel();
          return Err(e);
        }
      }
    }
    if workers.is_empty() {
      return Err(WorkerError::NoWorkers);
    }

    info!(kind = kind.as_str(), workers = workers.len(), "Worker pool started");
    Ok(Self {
      inner: Arc::new(PoolInner {
        kind,
        workers,
        next: AtomicUsize::new(0),
        pending,
        ids,
        timeout,
        cancel,
      }),
    })
  }

  pub fn kind(&self) -> WorkerKind {
    self.inner.kind
  }

  pub fn len(&self) -> usize {
    self.inner.workers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.workers.is_empty()
  }

  pub fn pending_requests(&self) -> usize {
    self.inner.pending.len()
  }

  pub fn is_terminated(&self) -> bool {
    self.inner.cancel.is_cancelled()
  }

  /// Send to the next worker in round-robin order and await the reply
  pub async fn request(&self, request: WorkerRequest) -> Result<WorkerReply, WorkerError> {
    let index = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.len().max(1);
    self.request_to(index, request).await
  }

  /// Send to a specific worker and await the reply
  pub async fn request_to(&self, index: usize, request: WorkerRequest) -> Result<WorkerReply, WorkerError> {
    if self.is_terminated() {
      return Err(WorkerError::Terminated);
    }
    let worker = self.inner.workers.get(index).ok_or(WorkerError::NoWorkers)?;

    let request_id = self.inner.ids.next();
    let (reply_tx, reply_rx) = oneshot::channel();
    self.inner.pending.insert(request_id.clone(), reply_tx);
    // terminate() may have drained the table between the check above and the insert
    if self.is_terminated() {
      self.inner.pending.remove(&request_id);
      return Err(WorkerError::Terminated);
    }

    let message = WorkerMessage {
      request_id: request_id.clone(),
      request,
    };
    if let Err(e) = worker.post(message) {
      self.inner.pending.remove(&request_id);
      return Err(e);
    }

    match tokio::time::timeout(self.inner.timeout, reply_rx).await {
      Ok(Ok(result)) => result,
      Ok(Err(_)) => Err(WorkerError::ChannelClosed { worker_id: worker.id }),
      Err(_) => {
        self.inner.pending.remove(&request_id);
        warn!(worker_id = worker.id, request_id = %request_id, "Worker request timed out");
        Err(WorkerError::Timeout)
      }
    }
  }

  /// Fire-and-forget delivery of `request` to every worker. Replies are
  /// dropped. Per-worker ordering guarantees later requests see its effect.
  pub fn post_all(&self, request: &WorkerRequest) {
    for worker in &self.inner.workers {
      let message = WorkerMessage {
        request_id: self.inner.ids.next(),
        request: request.clone(),
      };
      if let Err(e) = worker.post(message) {
        warn!(worker_id = worker.id, error = %e, "Failed to post to worker");
      }
    }
  }

  /// Stop all workers and fail every in-flight request with
  /// [`WorkerError::Terminated`]
  pub fn terminate(&self) {
    self.inner.cancel.cancel();
    let ids: Vec<RequestId> = self.inner.pending.iter().map(|e| e.key().clone()).collect();
    let rejected = ids.len();
    for id in ids {
      if let Some((_, reply)) = self.inner.pending.remove(&id) {
        let _ = reply.send(Err(WorkerError::Terminated));
      }
    }
    debug!(kind = self.inner.kind.as_str(), rejected, "Worker pool terminated");
  }
}

impl Drop for PoolInner {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}
