use super::interrupt;
use super::monitor::{self, Monitor};
use super::task::TaskError;
use crate::error::{Error, Result};

use log::warn;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type BarrierAction = Box<dyn FnMut() + Send + 'static>;

#[derive(Default)]
struct Generation {
  broken: AtomicBool,
}

impl Generation {
  fn is_broken(&self) -> bool {
    self.broken.load(Ordering::SeqCst)
  }
}

struct BarrierState {
  remaining: usize,
  generation: Arc<Generation>,
  action: Option<BarrierAction>,
}

/// A reusable rendezvous for a fixed number of parties.
///
/// Each call to [CyclicBarrier::wait] blocks until `parties` threads have
/// arrived, then all of them are released together and the barrier resets
/// for the next round. The optional action runs once per round, on the last
/// thread to arrive, before anyone is released; it must not use the barrier
/// itself.
///
/// If any party leaves a round early (interrupted, timed out) or the barrier
/// is [reset](CyclicBarrier::reset), everybody waiting in that round fails
/// with [Error::BrokenBarrier].
#[derive(Clone)]
pub struct CyclicBarrier {
  parties: usize,
  monitor: Arc<Monitor<BarrierState>>,
}

impl CyclicBarrier {
  pub fn new(parties: usize) -> Result<Self> {
    Self::build(parties, None)
  }

  pub fn with_action<F>(parties: usize, action: F) -> Result<Self>
  where
    F: FnMut() + Send + 'static,
  {
    Self::build(parties, Some(Box::new(action)))
  }

  fn build(parties: usize, action: Option<BarrierAction>) -> Result<Self> {
    if parties == 0 {
      return Err(Error::InvalidArgument("barrier needs at least one party"));
    }
    Ok(CyclicBarrier {
      parties,
      monitor: Monitor::new(BarrierState {
        remaining: parties,
        generation: Arc::new(Generation::default()),
        action,
      }),
    })
  }

  pub fn parties(&self) -> usize {
    self.parties
  }

  pub fn number_waiting(&self) -> usize {
    self.parties - self.monitor.lock().remaining
  }

  pub fn is_broken(&self) -> bool {
    self.monitor.lock().generation.is_broken()
  }

  /// Breaks the current round, if anyone is waiting in it, and starts a fresh
  /// one.
  pub fn reset(&self) {
    let mut state = self.monitor.lock();
    state.generation.broken.store(true, Ordering::SeqCst);
    self.next_generation(&mut state);
  }

  /// Waits for all parties. Returns the arrival index, `parties - 1` for the
  /// first to arrive down to `0` for the last.
  ///
  /// # Errors
  ///
  /// * [Error::BrokenBarrier] if the round was broken.
  /// * [Error::Interrupted] if this thread was interrupted, which also breaks
  ///   the round for the others.
  /// * [Error::Execution] for the last arrival if the barrier action panicked.
  pub fn wait(&self) -> Result<usize> {
    self.wait_until(None)
  }

  /// Like [CyclicBarrier::wait], giving up with [Error::Timeout] and breaking
  /// the round once `timeout` has elapsed.
  pub fn wait_timeout(&self, timeout: Duration) -> Result<usize> {
    self.wait_until(monitor::deadline(timeout))
  }

  fn next_generation(&self, state: &mut BarrierState) {
    state.remaining = self.parties;
    state.generation = Arc::new(Generation::default());
    self.monitor.notify_all();
  }

  fn break_generation(&self, generation: &Generation) {
    generation.broken.store(true, Ordering::SeqCst);
    self.monitor.notify_all();
  }

  fn wait_until(&self, deadline: Option<Instant>) -> Result<usize> {
    let mut state = self.monitor.lock();
    let generation = state.generation.clone();
    if generation.is_broken() {
      return Err(Error::BrokenBarrier);
    }
    if interrupt::is_interrupted() {
      self.break_generation(&generation);
      return Err(Error::Interrupted);
    }
    state.remaining -= 1;
    let index = state.remaining;
    if index == 0 {
      let outcome = match state.action.as_mut() {
        Some(action) => panic::catch_unwind(AssertUnwindSafe(|| action())),
        None => Ok(()),
      };
      return match outcome {
        Ok(()) => {
          self.next_generation(&mut state);
          Ok(0)
        }
        Err(payload) => {
          warn!("barrier action panicked");
          self.break_generation(&generation);
          Err(Error::Execution(TaskError::from_panic(payload)))
        }
      };
    }
    let released = |state: &mut BarrierState| {
      generation.is_broken() || !Arc::ptr_eq(&state.generation, &generation)
    };
    match self.monitor.wait_until(state, deadline, released) {
      Ok((_, true)) => self.outcome(&generation, index),
      Ok((_, false)) => {
        self.break_generation(&generation);
        Err(Error::Timeout)
      }
      Err(error) => {
        let state = self.monitor.lock();
        if Arc::ptr_eq(&state.generation, &generation) && !generation.is_broken() {
          self.break_generation(&generation);
          Err(error)
        } else {
          // The round completed anyway; the interrupt flag stays set.
          self.outcome(&generation, index)
        }
      }
    }
  }

  fn outcome(&self, generation: &Generation, index: usize) -> Result<usize> {
    if generation.is_broken() {
      Err(Error::BrokenBarrier)
    } else {
      Ok(index)
    }
  }
}
