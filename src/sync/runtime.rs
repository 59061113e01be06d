//! A process wide thread pool for fire-and-forget work.
//!
//! The runtime is created on first use with one worker per logical CPU and
//! lives until the process exits. It cannot be shut down: code that needs a
//! lifecycle should own an [ExecutorService].
use super::handle::TaskHandle;
use super::service::ExecutorService;
use super::task::{Task, TaskType};
use super::threadpool::{ThreadPool, ThreadPoolBuilder};
use crate::error::Result;

use log::error;

use std::sync::Arc;

struct Shared {
  pool: Arc<ThreadPool>,
  service: ExecutorService,
}

lazy_static! {
  static ref RUNTIME: Result<Shared> = ThreadPoolBuilder::named("runtime")
    .build()
    .map(|pool| {
      let pool = Arc::new(pool);
      Shared {
        service: ExecutorService::with_executor(pool.clone()),
        pool,
      }
    })
    .map_err(|cause| {
      error!("failed to start the shared runtime: {}", cause);
      cause
    });
}

fn shared() -> Result<&'static Shared> {
  RUNTIME.as_ref().map_err(Clone::clone)
}

pub struct Runtime;

impl Runtime {
  pub fn spawn<T>(task: Task<T>) -> Result<TaskHandle<T>>
  where
    T: TaskType,
  {
    shared()?.service.submit(task)
  }

  pub fn submit<F>(job: F) -> Result<TaskHandle<()>>
  where
    F: FnOnce() + Send + 'static,
  {
    Self::spawn(Task::runnable(job))
  }

  pub fn invoke_all<T, I>(tasks: I) -> Result<Vec<TaskHandle<T>>>
  where
    T: TaskType,
    I: IntoIterator<Item = Task<T>>,
  {
    shared()?.service.invoke_all(tasks)
  }

  pub fn invoke_any<T, I>(tasks: I) -> Result<T>
  where
    T: TaskType,
    I: IntoIterator<Item = Task<T>>,
  {
    shared()?.service.invoke_any(tasks)
  }

  pub fn size() -> usize {
    shared().map(|shared| shared.pool.size()).unwrap_or(0)
  }

  /// Whether nothing is queued or running on the runtime right now.
  pub fn done() -> bool {
    shared().map(|shared| shared.pool.idle()).unwrap_or(true)
  }
}
