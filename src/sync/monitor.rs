use super::interrupt::{self, Blocker};
use crate::error::{Error, Result};

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Converts a relative timeout into an absolute deadline, `None` meaning the
/// timeout is too large to represent and the wait is unbounded.
pub(crate) fn deadline(timeout: Duration) -> Option<Instant> {
  Instant::now().checked_add(timeout)
}

/// A mutex paired with a condition variable. Every blocking wait in the crate
/// goes through [Monitor::wait_until] so that it honours deadlines and thread
/// interruption the same way.
pub(crate) struct Monitor<S> {
  state: Mutex<S>,
  condvar: Condvar,
}

impl<S> Blocker for Monitor<S>
where
  S: Send + 'static,
{
  fn unblock(&self) {
    let _guard = self.lock();
    self.condvar.notify_all();
  }
}

impl<S> Monitor<S>
where
  S: Send + 'static,
{
  pub fn new(state: S) -> Arc<Self> {
    Arc::new(Monitor {
      state: Mutex::new(state),
      condvar: Condvar::new(),
    })
  }

  // Task panics are caught before they can unwind through a held lock, the
  // state is consistent even if the mutex reports poisoning.
  pub fn lock(&self) -> MutexGuard<'_, S> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn notify_all(&self) {
    self.condvar.notify_all();
  }

  /// Uninterruptible wait for a single notification.
  pub fn wait<'a>(&self, guard: MutexGuard<'a, S>) -> MutexGuard<'a, S> {
    self.condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
  }

  /// Parks until `ready` holds, the deadline passes or the calling thread is
  /// interrupted. The boolean tells whether `ready` held on return.
  pub fn wait_until<'a, F>(
    self: &'a Arc<Self>,
    mut guard: MutexGuard<'a, S>,
    deadline: Option<Instant>,
    mut ready: F,
  ) -> Result<(MutexGuard<'a, S>, bool)>
  where
    F: FnMut(&mut S) -> bool,
  {
    if ready(&mut *guard) {
      return Ok((guard, true));
    }
    let _registration = interrupt::register(self.clone());
    loop {
      if ready(&mut *guard) {
        return Ok((guard, true));
      }
      if interrupt::is_interrupted() {
        return Err(Error::Interrupted);
      }
      guard = match deadline {
        None => self.wait(guard),
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return Ok((guard, false));
          }
          self
            .condvar
            .wait_timeout(guard, deadline - now)
            .unwrap_or_else(PoisonError::into_inner)
            .0
        }
      };
    }
  }
}
