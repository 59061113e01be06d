//! Cooperative per-thread interruption.
//!
//! Every thread owns an interrupt flag. Setting it through an [Interruptor]
//! wakes the thread if it is parked in one of this crate's blocking calls
//! (`TaskHandle::get`, `ExecutorService::await_termination`, latches, barriers,
//! exchangers...), which then return [Error::Interrupted]. Task bodies that
//! want to be cancellable poll [is_interrupted] or call [check].
//!
//! The flag is sticky: returning `Error::Interrupted` does not clear it, so
//! every enclosing wait on the same thread observes it too. Use [interrupted]
//! or [clear] to consume it.
use super::spinlock::SpinLock;
use crate::error::{Error, Result};

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something a thread is parked on and that can be woken from the outside.
pub(crate) trait Blocker: Send + Sync {
  fn unblock(&self);
}

struct InterruptState {
  flag: AtomicBool,
  blocker: SpinLock<Option<Arc<dyn Blocker>>>,
}

impl InterruptState {
  fn new() -> Self {
    InterruptState {
      flag: AtomicBool::new(false),
      blocker: SpinLock::new(None),
    }
  }
}

thread_local! {
  static CURRENT: Arc<InterruptState> = Arc::new(InterruptState::new());
}

/// A handle able to interrupt one particular thread.
#[derive(Clone)]
pub struct Interruptor {
  state: Arc<InterruptState>,
  thread: Option<String>,
}

impl Interruptor {
  /// Sets the target thread's interrupt flag and wakes it if it is blocked.
  pub fn interrupt(&self) {
    if let Some(blocker) = self.raise() {
      blocker.unblock();
    }
  }

  /// Sets the flag and returns what the thread is parked on, leaving the
  /// wake-up to the caller. Lets a caller raise the flag while holding a lock
  /// the target might be parked on, and wake it once the lock is released.
  pub(crate) fn raise(&self) -> Option<Arc<dyn Blocker>> {
    self.state.flag.store(true, Ordering::SeqCst);
    self.state.blocker.lock().clone()
  }

  pub fn is_interrupted(&self) -> bool {
    self.state.flag.load(Ordering::SeqCst)
  }

  pub fn thread_name(&self) -> Option<&str> {
    self.thread.as_deref()
  }

  #[cfg(test)]
  pub(crate) fn same_thread(&self, other: &Interruptor) -> bool {
    Arc::ptr_eq(&self.state, &other.state)
  }
}

impl Debug for Interruptor {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Interruptor")
      .field("thread", &self.thread)
      .field("interrupted", &self.is_interrupted())
      .finish()
  }
}

fn with_current<R>(f: impl FnOnce(&Arc<InterruptState>) -> R) -> Option<R> {
  CURRENT.try_with(|state| f(state)).ok()
}

/// Returns an [Interruptor] for the calling thread.
pub fn current() -> Interruptor {
  Interruptor {
    state: with_current(Arc::clone).unwrap_or_else(|| Arc::new(InterruptState::new())),
    thread: std::thread::current().name().map(str::to_owned),
  }
}

pub fn is_interrupted() -> bool {
  with_current(|state| state.flag.load(Ordering::SeqCst)).unwrap_or(false)
}

/// Returns whether the calling thread was interrupted and clears the flag.
pub fn interrupted() -> bool {
  with_current(|state| state.flag.swap(false, Ordering::SeqCst)).unwrap_or(false)
}

pub fn clear() {
  let _ = interrupted();
}

/// Fails with [Error::Interrupted] if the calling thread has been interrupted.
pub fn check() -> Result<()> {
  if is_interrupted() {
    Err(Error::Interrupted)
  } else {
    Ok(())
  }
}

/// Keeps a blocker registered on the calling thread until dropped.
pub(crate) struct Registration {
  state: Option<Arc<InterruptState>>,
  previous: Option<Arc<dyn Blocker>>,
}

impl Drop for Registration {
  fn drop(&mut self) {
    if let Some(state) = &self.state {
      *state.blocker.lock() = self.previous.take();
    }
  }
}

/// Registers `blocker` as the thing the calling thread is about to park on.
///
/// The caller has to check the interrupt flag after registering and before
/// parking, otherwise an interrupt landing in between is lost.
pub(crate) fn register(blocker: Arc<dyn Blocker>) -> Registration {
  let state = with_current(Arc::clone);
  let previous = state
    .as_ref()
    .and_then(|state| state.blocker.lock().replace(blocker));
  Registration { state, previous }
}
