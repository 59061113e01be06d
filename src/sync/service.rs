//! The executor service: typed task submission, lifecycle management and bulk
//! invocation on top of an [Executor] engine.
use super::executor::{Executor, RunState};
use super::handle::{Job, TaskHandle};
use super::monitor::{self, Monitor};
use super::scheduler::{make_scheduler, SchedulerType};
use super::task::{Task, TaskType};
use crate::error::{Error, Result};

use log::{debug, trace};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Accepts tasks, runs them on its engine and manages the shutdown lifecycle.
///
/// Cloning a service yields another handle to the same engine.
///
/// # Example
/// ```
/// use conductor::sync::service::ExecutorService;
/// use conductor::sync::scheduler::SchedulerType;
/// use conductor::sync::task::Task;
/// use std::time::Duration;
///
/// let service = ExecutorService::new(SchedulerType::Pool(4)).unwrap();
/// let handles = service
///   .invoke_all((1..=3).map(|i| Task::from_fn(move || i * 10)))
///   .unwrap();
/// let values: Vec<i32> = handles.iter().map(|h| h.get().unwrap()).collect();
/// assert_eq!(values, vec![10, 20, 30]);
///
/// service.shutdown();
/// assert!(service.submit_fn(|| 1).is_err());
/// assert!(service.await_termination(Duration::from_secs(5)).unwrap());
/// ```
#[derive(Clone)]
pub struct ExecutorService {
  executor: Arc<dyn Executor>,
}

impl<E> From<E> for ExecutorService
where
  E: Executor + 'static,
{
  fn from(executor: E) -> Self {
    ExecutorService {
      executor: Arc::new(executor),
    }
  }
}

impl ExecutorService {
  /// Builds a service over a freshly created engine of the given type.
  pub fn new(strategy: SchedulerType) -> Result<Self> {
    Self::named("executor", strategy)
  }

  /// Like [ExecutorService::new], naming the engine's threads after `name`.
  pub fn named(name: &str, strategy: SchedulerType) -> Result<Self> {
    Ok(ExecutorService {
      executor: make_scheduler(name, strategy)?,
    })
  }

  pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
    ExecutorService { executor }
  }

  pub fn scheduler_type(&self) -> SchedulerType {
    self.executor.scheduler_type()
  }

  /// Submits `task` and returns its handle right away.
  ///
  /// # Errors
  ///
  /// [Error::Rejected] once shutdown has been requested, or when the engine's
  /// queue is saturated.
  pub fn submit<T>(&self, task: Task<T>) -> Result<TaskHandle<T>>
  where
    T: TaskType,
  {
    let (handle, job) = TaskHandle::new(task);
    self.dispatch(job)?;
    Ok(handle)
  }

  pub fn submit_fn<T, F>(&self, body: F) -> Result<TaskHandle<T>>
  where
    T: TaskType,
    F: FnOnce() -> T + Send + 'static,
  {
    self.submit(Task::from_fn(body))
  }

  /// Submits an effect whose handle yields `result` once it has run.
  pub fn submit_runnable<T, F>(&self, body: F, result: T) -> Result<TaskHandle<T>>
  where
    T: TaskType,
    F: FnOnce() + Send + 'static,
  {
    self.submit(Task::with_result(body, result))
  }

  /// Fire and forget.
  pub fn execute<F>(&self, body: F) -> Result<()>
  where
    F: FnOnce() + Send + 'static,
  {
    self.submit(Task::runnable(body)).map(|_| ())
  }

  fn dispatch(&self, job: Job) -> Result<()> {
    let id = job.id();
    self.executor.execute(job).map_err(|error| {
      debug!("submission of task {} failed: {}", id, error);
      error
    })
  }

  /// Graceful shutdown: rejects new tasks, lets accepted ones finish. Does not
  /// block.
  pub fn shutdown(&self) {
    self.executor.shutdown();
  }

  /// Forceful shutdown: rejects new tasks, interrupts running ones and returns
  /// the queued tasks that never started. Their handles report cancellation.
  pub fn shutdown_now(&self) -> Vec<Job> {
    let drained = self.executor.shutdown_now();
    debug!("shutdown_now discarded {} queued tasks", drained.len());
    drained
  }

  pub fn run_state(&self) -> RunState {
    self.executor.run_state()
  }

  pub fn is_shutdown(&self) -> bool {
    self.run_state() != RunState::Running
  }

  pub fn is_terminated(&self) -> bool {
    self.run_state() == RunState::Terminated
  }

  /// Blocks until the service terminates or `timeout` elapses, returning
  /// whether it terminated. A zero timeout only checks.
  ///
  /// # Errors
  ///
  /// [Error::Interrupted] if the calling thread is interrupted while waiting.
  pub fn await_termination(&self, timeout: Duration) -> Result<bool> {
    self.executor.await_termination(monitor::deadline(timeout))
  }

  /// Runs every task and waits for all of them to finish, successfully or
  /// not. Handles come back in input order and are all terminal.
  ///
  /// If the calling thread is interrupted while waiting, every unfinished
  /// task is cancelled before [Error::Interrupted] is returned. If a
  /// submission is rejected, the tasks already submitted are cancelled and
  /// the rejection is returned.
  pub fn invoke_all<T, I>(&self, tasks: I) -> Result<Vec<TaskHandle<T>>>
  where
    T: TaskType,
    I: IntoIterator<Item = Task<T>>,
  {
    self.invoke_all_until(tasks, None)
  }

  /// Like [ExecutorService::invoke_all], but once `timeout` elapses every
  /// unfinished task is cancelled and the handles are returned as they are.
  pub fn invoke_all_timeout<T, I>(&self, tasks: I, timeout: Duration) -> Result<Vec<TaskHandle<T>>>
  where
    T: TaskType,
    I: IntoIterator<Item = Task<T>>,
  {
    self.invoke_all_until(tasks, monitor::deadline(timeout))
  }

  fn invoke_all_until<T, I>(&self, tasks: I, deadline: Option<Instant>) -> Result<Vec<TaskHandle<T>>>
  where
    T: TaskType,
    I: IntoIterator<Item = Task<T>>,
  {
    let (handles, jobs): (Vec<_>, Vec<_>) = tasks.into_iter().map(TaskHandle::new).unzip();
    trace!("invoke_all over {} tasks", handles.len());
    for job in jobs {
      if let Err(error) = self.dispatch(job) {
        cancel_all(&handles);
        return Err(error);
      }
      if expired(deadline) {
        cancel_all(&handles);
        return Ok(handles);
      }
    }
    for handle in handles.iter() {
      match handle.wait_until(deadline) {
        Ok(true) => (),
        Ok(false) => {
          cancel_all(&handles);
          return Ok(handles);
        }
        Err(error) => {
          cancel_all(&handles);
          return Err(error);
        }
      }
    }
    Ok(handles)
  }

  /// Runs the tasks and returns the value of the first one to succeed,
  /// cancelling all the others.
  ///
  /// Tasks are submitted one at a time for as long as none has succeeded, so
  /// on a caller-runs engine the remaining tasks are skipped once one
  /// succeeds.
  ///
  /// # Errors
  ///
  /// * [Error::InvalidArgument] if `tasks` is empty.
  /// * [Error::AllFailed] with every failure if no task succeeded.
  /// * [Error::Interrupted] if the calling thread is interrupted.
  pub fn invoke_any<T, I>(&self, tasks: I) -> Result<T>
  where
    T: TaskType,
    I: IntoIterator<Item = Task<T>>,
  {
    self.invoke_any_until(tasks, None)
  }

  /// Like [ExecutorService::invoke_any], failing with [Error::Timeout] if no
  /// task succeeded before `timeout` elapsed.
  pub fn invoke_any_timeout<T, I>(&self, tasks: I, timeout: Duration) -> Result<T>
  where
    T: TaskType,
    I: IntoIterator<Item = Task<T>>,
  {
    self.invoke_any_until(tasks, monitor::deadline(timeout))
  }

  fn invoke_any_until<T, I>(&self, tasks: I, deadline: Option<Instant>) -> Result<T>
  where
    T: TaskType,
    I: IntoIterator<Item = Task<T>>,
  {
    let mut pending = tasks.into_iter().peekable();
    if pending.peek().is_none() {
      return Err(Error::InvalidArgument("invoke_any requires at least one task"));
    }
    let completions = Completions::new();
    let mut handles: Vec<TaskHandle<T>> = Vec::new();
    let outcome = self.race(&mut pending, &mut handles, &completions, deadline);
    cancel_all(&handles);
    outcome
  }

  fn race<T, I>(
    &self,
    pending: &mut I,
    handles: &mut Vec<TaskHandle<T>>,
    completions: &Completions,
    deadline: Option<Instant>,
  ) -> Result<T>
  where
    T: TaskType,
    I: Iterator<Item = Task<T>>,
  {
    let mut failures = Vec::new();
    let mut active = 0usize;
    loop {
      let mut next = completions.poll();
      if next.is_none() {
        if let Some(task) = pending.next() {
          self.submit_tracked(task, handles, completions)?;
          active += 1;
          continue;
        }
        if active == 0 {
          break;
        }
        next = completions.wait(deadline)?;
        if next.is_none() {
          return Err(Error::Timeout);
        }
      }
      if let Some(index) = next {
        active -= 1;
        match handles[index].get() {
          Ok(value) => return Ok(value),
          Err(error) => failures.push(error),
        }
      }
    }
    Err(Error::AllFailed(failures))
  }

  fn submit_tracked<T>(
    &self,
    task: Task<T>,
    handles: &mut Vec<TaskHandle<T>>,
    completions: &Completions,
  ) -> Result<()>
  where
    T: TaskType,
  {
    let index = handles.len();
    let (handle, job) = TaskHandle::new(task);
    let notifier = completions.notifier();
    handle.when_done(move || notifier.push(index));
    handles.push(handle);
    self.dispatch(job)
  }
}

fn expired(deadline: Option<Instant>) -> bool {
  deadline.map_or(false, |deadline| Instant::now() >= deadline)
}

fn cancel_all<T>(handles: &[TaskHandle<T>])
where
  T: TaskType,
{
  for handle in handles {
    handle.cancel(true);
  }
}

/// Indices of tasks in the order they reached a terminal state.
struct Completions {
  monitor: Arc<Monitor<VecDeque<usize>>>,
}

struct Notifier {
  monitor: Arc<Monitor<VecDeque<usize>>>,
}

impl Notifier {
  fn push(&self, index: usize) {
    self.monitor.lock().push_back(index);
    self.monitor.notify_all();
  }
}

impl Completions {
  fn new() -> Self {
    Completions {
      monitor: Monitor::new(VecDeque::new()),
    }
  }

  fn notifier(&self) -> Notifier {
    Notifier {
      monitor: self.monitor.clone(),
    }
  }

  fn poll(&self) -> Option<usize> {
    self.monitor.lock().pop_front()
  }

  fn wait(&self, deadline: Option<Instant>) -> Result<Option<usize>> {
    let guard = self.monitor.lock();
    let (mut queue, ready) = self
      .monitor
      .wait_until(guard, deadline, |queue| !queue.is_empty())?;
    Ok(if ready { queue.pop_front() } else { None })
  }
}
