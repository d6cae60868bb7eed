//! Wall-clock timestamps for cache entries.

use std::sync::atomic::{AtomicI64, Ordering};

static LAST: AtomicI64 = AtomicI64::new(0);

/// Epoch milliseconds, strictly increasing across calls in this process.
///
/// Two resolutions of the same file always get distinct timestamps, so a
/// recompute after invalidation is observably newer than the value it replaced.
pub fn now_millis() -> i64 {
  let wall = chrono::Utc::now().timestamp_millis();
  let mut prev = LAST.load(Ordering::Relaxed);
  loop {
    let next = wall.max(prev + 1);
    match LAST.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
      Ok(_) => return next,
      Err(actual) => prev = actual,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_now_millis_strictly_increases() {
    let mut last = now_millis();
    for _ in 0..1000 {
      let next = now_millis();
      assert!(next > last);
      last = next;
    }
  }
}
