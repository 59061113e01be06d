use super::executor::{Executor, RunState};
use super::handle::Job;
use super::scheduler::SchedulerType;
use super::threadpool::{ThreadPool, ThreadPoolBuilder};
use crate::error::Result;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// A single dedicated thread running jobs one after the other, in submission
/// order.
///
/// # Example
/// ```
/// use conductor::sync::service::ExecutorService;
/// use conductor::sync::worker::Worker;
/// use std::sync::{Arc, atomic::{AtomicU16, Ordering}};
/// use std::time::Duration;
///
/// let atomic = Arc::new(AtomicU16::new(0));
/// let service = ExecutorService::from(Worker::new().unwrap());
/// let (copy1, copy2) = (atomic.clone(), atomic.clone());
/// service.execute(move || { copy1.fetch_add(10, Ordering::Relaxed); }).unwrap();
/// service.execute(move || { copy2.fetch_add(5, Ordering::Relaxed); }).unwrap();
/// service.shutdown();
/// assert!(service.await_termination(Duration::from_secs(5)).unwrap());
/// assert_eq!(atomic.load(Ordering::Relaxed), 15);
/// ```
pub struct Worker {
  pool: ThreadPool,
}

impl Worker {
  /// Spawns a worker thread named `worker{n}`.
  pub fn new() -> Result<Self> {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    Self::named(format!("worker{}", id))
  }

  pub fn named<S: Into<String>>(name: S) -> Result<Self> {
    Ok(Worker {
      pool: ThreadPoolBuilder::named(name).size(1).build()?,
    })
  }

  pub fn name(&self) -> &str {
    self.pool.name()
  }

  /// Whether nothing is queued or running.
  pub fn idle(&self) -> bool {
    self.pool.idle()
  }

  pub fn queued(&self) -> usize {
    self.pool.queued()
  }
}

impl Executor for Worker {
  fn execute(&self, job: Job) -> Result<()> {
    self.pool.execute(job)
  }

  fn shutdown(&self) {
    self.pool.shutdown()
  }

  fn shutdown_now(&self) -> Vec<Job> {
    self.pool.shutdown_now()
  }

  fn run_state(&self) -> RunState {
    self.pool.run_state()
  }

  fn await_termination(&self, deadline: Option<Instant>) -> Result<bool> {
    self.pool.await_termination(deadline)
  }

  fn scheduler_type(&self) -> SchedulerType {
    SchedulerType::Worker
  }
}
