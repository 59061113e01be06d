//! Outcome handles.
//!
//! Submitting a [Task] produces two views of the same shared cell: a typed
//! [TaskHandle] returned to the submitter and a type erased [Job] handed to the
//! engine that will run it. All state transitions happen under the cell's
//! mutex, which is also what makes the body's effects visible to whoever
//! observes the terminal state.
use super::interrupt::{self, Interruptor};
use super::monitor::{self, Monitor};
use super::task::{Task, TaskError, TaskType};
use crate::error::{Error, Result};

use log::{debug, warn};

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl TaskState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      TaskState::Completed | TaskState::Failed | TaskState::Cancelled
    )
  }
}

type Listener = Box<dyn FnOnce() + Send + 'static>;

struct Slot<T> {
  state: TaskState,
  task: Option<Task<T>>,
  outcome: Option<Result<T>>,
  runner: Option<Interruptor>,
  listeners: Vec<Listener>,
}

type Cell<T> = Monitor<Slot<T>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// The submitter's view of a task: query it, wait for it, cancel it.
pub struct TaskHandle<T> {
  id: u64,
  name: Option<Arc<str>>,
  cell: Arc<Cell<T>>,
}

impl<T> Clone for TaskHandle<T> {
  fn clone(&self) -> Self {
    TaskHandle {
      id: self.id,
      name: self.name.clone(),
      cell: self.cell.clone(),
    }
  }
}

impl<T> TaskHandle<T>
where
  T: TaskType,
{
  pub(crate) fn new(mut task: Task<T>) -> (TaskHandle<T>, Job) {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let name: Option<Arc<str>> = task.take_name().map(Arc::from);
    let cell = Monitor::new(Slot {
      state: TaskState::Pending,
      task: Some(task),
      outcome: None,
      runner: None,
      listeners: Vec::new(),
    });
    let handle = TaskHandle {
      id,
      name: name.clone(),
      cell: cell.clone(),
    };
    let job = Job {
      id,
      name,
      runnable: Box::new(cell),
    };
    (handle, job)
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn state(&self) -> TaskState {
    self.cell.lock().state
  }

  pub fn is_done(&self) -> bool {
    self.state().is_terminal()
  }

  pub fn is_cancelled(&self) -> bool {
    self.state() == TaskState::Cancelled
  }

  /// Requests cancellation.
  ///
  /// A task that has not started yet will never start. A running task is
  /// marked cancelled right away and its eventual result discarded; with
  /// `may_interrupt` the thread running it is also interrupted, which the
  /// body may or may not honour. Returns `false` if the task had already
  /// reached a terminal state.
  pub fn cancel(&self, may_interrupt: bool) -> bool {
    cancel_cell(&self.cell, may_interrupt)
  }

  /// Blocks until the task finishes and returns its value.
  ///
  /// # Errors
  ///
  /// * [Error::Execution] if the body failed or panicked.
  /// * [Error::Cancelled] if the task was cancelled.
  /// * [Error::Interrupted] if the calling thread was interrupted while
  ///   waiting.
  pub fn get(&self) -> Result<T> {
    self.get_until(None)
  }

  /// Like [TaskHandle::get] but gives up with [Error::Timeout] once `timeout`
  /// has elapsed.
  pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
    self.get_until(monitor::deadline(timeout))
  }

  fn get_until(&self, deadline: Option<Instant>) -> Result<T> {
    let guard = self.cell.lock();
    let (slot, done) = self
      .cell
      .wait_until(guard, deadline, |slot| slot.state.is_terminal())?;
    if !done {
      return Err(Error::Timeout);
    }
    match &slot.outcome {
      Some(outcome) => outcome.clone(),
      None => Err(Error::Cancelled),
    }
  }

  /// Blocks until the task reaches a terminal state, without looking at the
  /// outcome.
  pub fn wait(&self) -> Result<()> {
    self.wait_until(None).map(|_| ())
  }

  /// Returns whether the task finished within `timeout`.
  pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
    self.wait_until(monitor::deadline(timeout))
  }

  pub(crate) fn wait_until(&self, deadline: Option<Instant>) -> Result<bool> {
    let guard = self.cell.lock();
    let (_guard, done) = self
      .cell
      .wait_until(guard, deadline, |slot| slot.state.is_terminal())?;
    Ok(done)
  }

  /// Registers `listener` to run once the task reaches a terminal state. It
  /// runs on the thread causing the transition, or right away if the task is
  /// already done.
  pub(crate) fn when_done<F>(&self, listener: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let mut slot = self.cell.lock();
    if slot.state.is_terminal() {
      drop(slot);
      listener();
    } else {
      slot.listeners.push(Box::new(listener));
    }
  }
}

impl<T> Debug for TaskHandle<T>
where
  T: TaskType,
{
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskHandle")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("state", &self.cell.lock().state)
      .finish()
  }
}

fn cancel_cell<T>(cell: &Arc<Cell<T>>, may_interrupt: bool) -> bool
where
  T: TaskType,
{
  let (body, listeners, blocker) = {
    let mut slot = cell.lock();
    if slot.state.is_terminal() {
      return false;
    }
    slot.state = TaskState::Cancelled;
    // The flag is raised under the lock so the runner cannot have moved on to
    // another job. Waking it waits until the lock is released: the body may be
    // parked on this very cell.
    let blocker = if may_interrupt {
      slot.runner.take().and_then(|runner| runner.raise())
    } else {
      None
    };
    cell.notify_all();
    (slot.task.take(), std::mem::take(&mut slot.listeners), blocker)
  };
  if let Some(blocker) = blocker {
    blocker.unblock();
  }
  drop(body);
  for listener in listeners {
    listener();
  }
  true
}

/// Type erased operations an engine needs on a submitted task.
trait Runnable: Send + Sync {
  fn run(&self, id: u64);
  fn cancel(&self, may_interrupt: bool) -> bool;
  fn state(&self) -> TaskState;
}

impl<T> Runnable for Arc<Cell<T>>
where
  T: TaskType,
{
  fn run(&self, id: u64) {
    let task = {
      let mut slot = self.lock();
      if slot.state != TaskState::Pending {
        return;
      }
      match slot.task.take() {
        Some(task) => {
          slot.state = TaskState::Running;
          slot.runner = Some(interrupt::current());
          task
        }
        None => return,
      }
    };
    let result = task.call();
    let listeners = {
      let mut slot = self.lock();
      slot.runner = None;
      if slot.state == TaskState::Running {
        match result {
          Ok(value) => {
            slot.state = TaskState::Completed;
            slot.outcome = Some(Ok(value));
          }
          Err(error) => {
            match &error {
              TaskError::Panicked(message) => warn!("task {} panicked: {}", id, message),
              TaskError::Failed(cause) => debug!("task {} failed: {}", id, cause),
            }
            slot.state = TaskState::Failed;
            slot.outcome = Some(Err(Error::Execution(error)));
          }
        }
      } else {
        debug!("discarding outcome of cancelled task {}", id);
      }
      self.notify_all();
      std::mem::take(&mut slot.listeners)
    };
    for listener in listeners {
      listener();
    }
  }

  fn cancel(&self, may_interrupt: bool) -> bool {
    cancel_cell(self, may_interrupt)
  }

  fn state(&self) -> TaskState {
    self.lock().state
  }
}

/// The engine's view of a submitted task.
///
/// Running a job executes the task body on the calling thread at most once.
/// Jobs handed back by `shutdown_now` are already cancelled, running them is
/// a no-op.
pub struct Job {
  id: u64,
  name: Option<Arc<str>>,
  runnable: Box<dyn Runnable>,
}

impl Job {
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn state(&self) -> TaskState {
    self.runnable.state()
  }

  pub fn is_cancelled(&self) -> bool {
    self.state() == TaskState::Cancelled
  }

  pub fn cancel(&self, may_interrupt: bool) -> bool {
    self.runnable.cancel(may_interrupt)
  }

  pub fn run(self) {
    self.runnable.run(self.id);
  }
}

impl Debug for Job {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Job")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("state", &self.state())
      .finish()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::utils::testing::async_context;

  use std::sync::atomic::AtomicBool;

  #[test]
  fn run_completes_test() {
    let (handle, job) = TaskHandle::new(Task::from_fn(|| 5).named("five"));
    assert_eq!(handle.state(), TaskState::Pending);
    assert_eq!(job.name(), Some("five"));
    assert_eq!(job.id(), handle.id());
    job.run();
    assert_eq!(handle.state(), TaskState::Completed);
    assert!(handle.is_done());
    assert_eq!(handle.get().unwrap(), 5);
    assert_eq!(handle.get().unwrap(), 5);
  }

  #[test]
  fn run_failure_test() {
    let (handle, job) = TaskHandle::new(Task::new(|| Err::<i32, _>("broken")));
    job.run();
    assert_eq!(handle.state(), TaskState::Failed);
    match handle.get() {
      Err(Error::Execution(TaskError::Failed(cause))) => assert_eq!(cause.to_string(), "broken"),
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  #[test]
  fn cancel_before_start_test() {
    let ran = Arc::new(AtomicBool::new(false));
    let cloned = ran.clone();
    let (handle, job) = TaskHandle::new(Task::runnable(move || {
      cloned.store(true, Ordering::SeqCst);
    }));
    assert!(handle.cancel(false));
    assert!(job.is_cancelled());
    job.run();
    assert!(!ran.load(Ordering::SeqCst));
    assert!(matches!(handle.get(), Err(Error::Cancelled)));
    assert!(!handle.cancel(true));
  }

  #[test]
  fn cancel_after_completion_fails_test() {
    let (handle, job) = TaskHandle::new(Task::from_fn(|| 1));
    job.run();
    assert!(!handle.cancel(true));
    assert_eq!(handle.state(), TaskState::Completed);
  }

  #[test]
  fn get_timeout_test() {
    async_context(|| {
      let (handle, _job) = TaskHandle::new(Task::from_fn(|| 1));
      assert!(matches!(
        handle.get_timeout(Duration::from_millis(10)),
        Err(Error::Timeout)
      ));
      assert!(!handle.wait_timeout(Duration::from_millis(0)).unwrap());
    });
  }

  #[test]
  fn get_blocks_until_run_test() {
    async_context(|| {
      let (handle, job) = TaskHandle::new(Task::from_fn(|| "value"));
      let runner = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        job.run();
      });
      assert_eq!(handle.get().unwrap(), "value");
      runner.join().unwrap();
    });
  }

  #[test]
  fn cancel_running_interrupts_test() {
    async_context(|| {
      let (started_tx, started_rx) = std::sync::mpsc::channel();
      let (handle, job) = TaskHandle::new(Task::from_fn(move || {
        started_tx.send(()).unwrap();
        while !interrupt::is_interrupted() {
          std::thread::sleep(Duration::from_millis(1));
        }
        "interrupted"
      }));
      let runner = std::thread::spawn(move || job.run());
      started_rx.recv().unwrap();
      assert_eq!(handle.state(), TaskState::Running);
      assert!(handle.cancel(true));
      assert!(handle.is_cancelled());
      runner.join().unwrap();
      assert!(matches!(handle.get(), Err(Error::Cancelled)));
    });
  }

  #[test]
  fn get_interrupted_test() {
    async_context(|| {
      let (handle, _job) = TaskHandle::new(Task::from_fn(|| 1));
      let (tx, rx) = std::sync::mpsc::channel();
      let waiting = handle.clone();
      let waiter = std::thread::spawn(move || {
        tx.send(interrupt::current()).unwrap();
        let plain = waiting.get();
        let timed = waiting.get_timeout(Duration::from_secs(60));
        (plain, timed, interrupt::is_interrupted())
      });
      let interruptor = rx.recv().unwrap();
      std::thread::sleep(Duration::from_millis(20));
      interruptor.interrupt();
      let (plain, timed, still_interrupted) = waiter.join().unwrap();
      assert!(matches!(plain, Err(Error::Interrupted)));
      assert!(matches!(timed, Err(Error::Interrupted)));
      assert!(still_interrupted);
      assert_eq!(handle.state(), TaskState::Pending);
    });
  }

  #[test]
  fn cancel_task_waiting_on_itself_test() {
    async_context(|| {
      let (handle_tx, handle_rx) = std::sync::mpsc::channel::<TaskHandle<bool>>();
      let (started_tx, started_rx) = std::sync::mpsc::channel();
      let (outcome_tx, outcome_rx) = std::sync::mpsc::channel();
      let (handle, job) = TaskHandle::new(Task::from_fn(move || {
        let own = handle_rx.recv().unwrap();
        started_tx.send(()).unwrap();
        let cancelled = matches!(own.get(), Err(Error::Cancelled));
        outcome_tx.send(cancelled).unwrap();
        cancelled
      }));
      let runner = std::thread::spawn(move || job.run());
      handle_tx.send(handle.clone()).unwrap();
      started_rx.recv().unwrap();
      std::thread::sleep(Duration::from_millis(20));
      assert!(handle.cancel(true));
      assert!(outcome_rx.recv().unwrap());
      runner.join().unwrap();
      assert!(handle.is_cancelled());
    });
  }

  #[test]
  fn listeners_fire_once_test() {
    let (handle, job) = TaskHandle::new(Task::from_fn(|| 1));
    let (tx, rx) = std::sync::mpsc::channel();
    let cloned = tx.clone();
    handle.when_done(move || cloned.send("first").unwrap());
    job.run();
    handle.when_done(move || tx.send("late").unwrap());
    handle.cancel(true);
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["first", "late"]);
  }
}
