use super::blocking::Blocking;
use super::executor::Executor;
use super::threadpool::ThreadPoolBuilder;
use super::worker::Worker;
use crate::error::Result;

use std::sync::Arc;

/// The engines an [ExecutorService](super::service::ExecutorService) can be
/// built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerType {
  /// A single dedicated thread running jobs in submission order.
  Worker,
  /// A fixed number of threads sharing one FIFO queue.
  Pool(usize),
  /// Jobs run on the submitting thread.
  Blocking,
}

pub(crate) fn make_scheduler(name: &str, strategy: SchedulerType) -> Result<Arc<dyn Executor>> {
  let executor: Arc<dyn Executor> = match strategy {
    SchedulerType::Worker => Arc::new(Worker::named(name)?),
    SchedulerType::Pool(size) => Arc::new(ThreadPoolBuilder::named(name).size(size).build()?),
    SchedulerType::Blocking => Arc::new(Blocking::new()),
  };
  Ok(executor)
}
