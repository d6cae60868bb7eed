//! Worker thread runtime.
//!
//! A worker is an OS thread draining an unbounded channel. It owns its
//! [`WorkerState`]; nothing mutable is shared with the calling side except
//! the pending-request table the reply is delivered through.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::WorkerError;
use crate::handler::{WorkerKind, WorkerState};
use crate::message::{RequestId, WorkerMessage, WorkerReply, WorkerResponse};

/// Reply slots for in-flight requests, keyed by request id
pub(crate) type PendingMap = DashMap<RequestId, oneshot::Sender<Result<WorkerReply, WorkerError>>>;

/// Calling-side handle to one worker thread
#[derive(Debug)]
pub(crate) struct WorkerHandle {
  pub id: usize,
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
  pub fn spawn(
    id: usize,
    kind: WorkerKind,
    pending: Arc<PendingMap>,
    cancel: CancellationToken,
  ) -> Result<Self, WorkerError> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
      .name(format!("tg-{}-{}", kind.as_str(), id))
      .spawn(move || run(id, WorkerState::new(kind), rx, pending, cancel))
      .map_err(|e| WorkerError::Spawn {
        worker_id: id,
        message: e.to_string(),
      })?;
    Ok(Self { id, tx })
  }

  /// Queue a message; fails only when the worker thread has exited
  pub fn post(&self, message: WorkerMessage) -> Result<(), WorkerError> {
    self
      .tx
      .send(message)
      .map_err(|_| WorkerError::ChannelClosed { worker_id: self.id })
  }
}

fn run(
  worker_id: usize,
  mut state: WorkerState,
  mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
  pending: Arc<PendingMap>,
  cancel: CancellationToken,
) {
  debug!(worker_id, kind = state.kind().as_str(), "Worker started");
  let mut handled = 0usize;

  while let Some(WorkerMessage { request_id, request }) = rx.blocking_recv() {
    if cancel.is_cancelled() {
      trace!(worker_id, request_id = %request_id, "Worker cancelled, dropping queued request");
      break;
    }

    let kind = request.kind();
    let result = match catch_unwind(AssertUnwindSafe(|| state.handle(request))) {
      Ok(result) => result,
      Err(panic) => {
        let message = panic
          .downcast_ref::<&str>()
          .map(|s| s.to_string())
          .or_else(|| panic.downcast_ref::<String>().cloned())
          .unwrap_or_else(|| "unknown panic".to_string());
        warn!(worker_id, request = kind, error = %message, "Worker handler panicked");
        Err(message)
      }
    };
    handled += 1;
    deliver(&pending, WorkerResponse { request_id, result });
  }

  debug!(worker_id, handled, "Worker stopped");
}

/// Hand `response` to whoever is waiting on its request id. The slot is gone
/// when the caller timed out or the pool was torn down.
fn deliver(pending: &PendingMap, response: WorkerResponse) {
  let Some((_, reply)) = pending.remove(&response.request_id) else {
    trace!(request_id = %response.request_id, success = response.success(), "Dropping late response");
    return;
  };
  let _ = reply.send(response.into_result());
}
