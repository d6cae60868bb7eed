use thiserror::Error;

/// Failure of the configurable parser for a whole file
#[derive(Debug, Error)]
pub enum ParseError {
  #[error("parser panicked on {file}: {message}")]
  Panicked { file: String, message: String },
}

/// Structural problems with a canvas document
#[derive(Debug, Error)]
pub enum CanvasError {
  #[error("invalid canvas JSON: {0}")]
  InvalidJson(#[from] serde_json::Error),

  #[error("canvas has no nodes array")]
  MissingNodes,
}
