use super::executor::{Executor, RunState};
use super::handle::Job;
use super::interrupt::{self, Interruptor};
use super::monitor::Monitor;
use super::scheduler::SchedulerType;
use crate::error::{Error, RejectReason, Result};

use log::debug;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

struct BlockingState {
  run_state: RunState,
  next: usize,
  running: HashMap<usize, Interruptor>,
}

/// Caller-runs engine: every job runs to completion on the thread submitting
/// it, before `execute` returns.
///
/// `shutdown_now` interrupts the submitting threads of the jobs still running,
/// their interrupt flags stay set once the job returns.
pub struct Blocking {
  monitor: Arc<Monitor<BlockingState>>,
}

impl Default for Blocking {
  fn default() -> Self {
    Blocking {
      monitor: Monitor::new(BlockingState {
        run_state: RunState::Running,
        next: 0,
        running: HashMap::new(),
      }),
    }
  }
}

impl Blocking {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of jobs currently running on caller threads.
  pub fn active(&self) -> usize {
    self.monitor.lock().running.len()
  }
}

struct Running<'a> {
  monitor: &'a Monitor<BlockingState>,
  key: usize,
}

impl Drop for Running<'_> {
  fn drop(&mut self) {
    let mut state = self.monitor.lock();
    state.running.remove(&self.key);
    if state.running.is_empty() && state.run_state == RunState::ShuttingDown {
      state.run_state = RunState::Terminated;
      debug!("caller-runs executor terminated");
    }
    self.monitor.notify_all();
  }
}

impl Executor for Blocking {
  fn execute(&self, job: Job) -> Result<()> {
    let _running = {
      let mut state = self.monitor.lock();
      if state.run_state != RunState::Running {
        debug!("caller-runs executor rejected job {}: shut down", job.id());
        return Err(Error::Rejected(RejectReason::Shutdown));
      }
      let key = state.next;
      state.next += 1;
      state.running.insert(key, interrupt::current());
      Running {
        monitor: &self.monitor,
        key,
      }
    };
    job.run();
    Ok(())
  }

  fn shutdown(&self) {
    let mut state = self.monitor.lock();
    if state.run_state == RunState::Running {
      state.run_state = if state.running.is_empty() {
        RunState::Terminated
      } else {
        RunState::ShuttingDown
      };
      debug!("caller-runs executor shut down");
    }
    self.monitor.notify_all();
  }

  fn shutdown_now(&self) -> Vec<Job> {
    self.shutdown();
    let running: Vec<Interruptor> = self.monitor.lock().running.values().cloned().collect();
    for interruptor in running {
      interruptor.interrupt();
    }
    Vec::new()
  }

  fn run_state(&self) -> RunState {
    self.monitor.lock().run_state
  }

  fn await_termination(&self, deadline: Option<Instant>) -> Result<bool> {
    let guard = self.monitor.lock();
    let (_guard, terminated) = self.monitor.wait_until(guard, deadline, |state| {
      state.run_state == RunState::Terminated
    })?;
    Ok(terminated)
  }

  fn scheduler_type(&self) -> SchedulerType {
    SchedulerType::Blocking
  }
}
