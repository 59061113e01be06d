use super::handle::Job;
use super::scheduler::SchedulerType;
use crate::error::Result;

use std::time::Instant;

/// Lifecycle of an executor. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
  /// Accepting and running tasks.
  Running,
  /// Shutdown was requested: submissions are rejected, accepted tasks drain.
  ShuttingDown,
  /// Nothing is queued or running anymore.
  Terminated,
}

/// The engine seam: something able to run [Job]s and to be shut down.
///
/// Implementations decide where and when an accepted job runs. They must
/// reject every job offered after `shutdown` or `shutdown_now` was called,
/// and must not run anything once they report [RunState::Terminated].
pub trait Executor: Send + Sync {
  fn execute(&self, job: Job) -> Result<()>;

  /// Stops accepting jobs, lets accepted ones run to completion.
  fn shutdown(&self);

  /// Stops accepting jobs, interrupts running ones and returns the queued
  /// jobs that never started, cancelled.
  fn shutdown_now(&self) -> Vec<Job>;

  fn run_state(&self) -> RunState;

  /// Blocks until the executor terminates or `deadline` passes, `None` waiting
  /// forever. Returns whether termination was observed.
  fn await_termination(&self, deadline: Option<Instant>) -> Result<bool>;

  fn scheduler_type(&self) -> SchedulerType;
}
