use super::monitor::{self, Monitor};
use crate::error::Result;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A one-shot gate opening once `count_down` has been called `count` times.
///
/// Clones share the same counter.
#[derive(Clone)]
pub struct CountDownLatch {
  monitor: Arc<Monitor<usize>>,
}

impl CountDownLatch {
  pub fn new(count: usize) -> Self {
    CountDownLatch {
      monitor: Monitor::new(count),
    }
  }

  /// Decrements the count, releasing every waiter when it reaches zero. Extra
  /// calls once open are ignored.
  pub fn count_down(&self) {
    let mut count = self.monitor.lock();
    if *count > 0 {
      *count -= 1;
      if *count == 0 {
        self.monitor.notify_all();
      }
    }
  }

  pub fn count(&self) -> usize {
    *self.monitor.lock()
  }

  /// Blocks until the count reaches zero.
  pub fn wait(&self) -> Result<()> {
    self.wait_until(None).map(|_| ())
  }

  /// Returns whether the count reached zero within `timeout`.
  pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
    self.wait_until(monitor::deadline(timeout))
  }

  fn wait_until(&self, deadline: Option<Instant>) -> Result<bool> {
    let guard = self.monitor.lock();
    let (_guard, open) = self.monitor.wait_until(guard, deadline, |count| *count == 0)?;
    Ok(open)
  }
}
