use thiserror::Error;

/// Failure of a single worker round trip
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
  #[error("Failed to spawn worker {worker_id}: {message}")]
  Spawn { worker_id: usize, message: String },

  #[error("No workers available")]
  NoWorkers,

  #[error("Worker {worker_id} channel closed")]
  ChannelClosed { worker_id: usize },

  #[error("Worker request timeout")]
  Timeout,

  #[error("Workers terminated")]
  Terminated,

  #[error("Worker error: {0}")]
  Remote(String),

  #[error("Unexpected worker response to {0}")]
  UnexpectedResponse(&'static str),
}
