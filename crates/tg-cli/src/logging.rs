//! Logging setup for the CLI

use tracing_subscriber::EnvFilter;

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize console logging on stderr so stdout stays machine readable.
///
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(level: &str) {
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(level).into())
    .from_env_lossy();

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_writer(std::io::stderr)
    .init();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_log_level() {
    assert_eq!(parse_log_level("DEBUG"), tracing::Level::DEBUG);
    assert_eq!(parse_log_level("off"), tracing::Level::ERROR);
    assert_eq!(parse_log_level("loud"), tracing::Level::INFO);
  }
}
