//! A fixed-size pool of worker threads sharing one FIFO queue.
use super::executor::{Executor, RunState};
use super::handle::Job;
use super::interrupt::{self, Interruptor};
use super::monitor::Monitor;
use super::scheduler::SchedulerType;
use crate::error::{Error, RejectReason, Result};

use log::{debug, error, trace};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// What a pool with a bounded queue does with a job arriving while the queue
/// is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaturationPolicy {
  /// Fail the submission with `RejectReason::Saturated`.
  Reject,
  /// Run the job on the submitting thread.
  CallerRuns,
}

pub struct ThreadPoolBuilder {
  name: String,
  size: usize,
  capacity: Option<usize>,
  saturation: SaturationPolicy,
}

impl Default for ThreadPoolBuilder {
  fn default() -> Self {
    Self::named("pool")
  }
}

impl ThreadPoolBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts a builder whose threads are named `{name}-{index}`. The pool size
  /// defaults to the number of logical CPUs and the queue is unbounded.
  pub fn named<S: Into<String>>(name: S) -> Self {
    ThreadPoolBuilder {
      name: name.into(),
      size: num_cpus::get(),
      capacity: None,
      saturation: SaturationPolicy::Reject,
    }
  }

  pub fn size(mut self, size: usize) -> Self {
    self.size = size;
    self
  }

  /// Bounds the number of queued, not yet started, jobs.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = Some(capacity);
    self
  }

  pub fn saturation(mut self, policy: SaturationPolicy) -> Self {
    self.saturation = policy;
    self
  }

  /// Spawns the worker threads.
  ///
  /// # Errors
  ///
  /// [Error::InvalidArgument] for a zero size or capacity, [Error::Spawn] if
  /// the operating system refuses to create a thread.
  pub fn build(self) -> Result<ThreadPool> {
    if self.size == 0 {
      return Err(Error::InvalidArgument("thread pool size must be positive"));
    }
    if self.capacity == Some(0) {
      return Err(Error::InvalidArgument("queue capacity must be positive"));
    }
    let pool = ThreadPool {
      inner: Arc::new(PoolInner {
        name: self.name,
        size: self.size,
        capacity: self.capacity,
        saturation: self.saturation,
        monitor: Monitor::new(PoolState {
          queue: VecDeque::new(),
          run_state: RunState::Running,
          stopping: false,
          alive: self.size,
          busy: HashMap::new(),
          callers: HashMap::new(),
          next_caller: 0,
          completed: 0,
        }),
      }),
    };
    for index in 0..pool.inner.size {
      let inner = pool.inner.clone();
      let spawned = std::thread::Builder::new()
        .name(format!("{}-{}", pool.inner.name, index))
        .spawn(move || run_worker(inner, index));
      if let Err(cause) = spawned {
        error!(
          "failed to spawn worker {} of pool '{}': {}",
          index, pool.inner.name, cause
        );
        pool.inner.monitor.lock().alive -= pool.inner.size - index;
        pool.shutdown();
        return Err(cause.into());
      }
    }
    debug!(
      "started pool '{}' with {} workers",
      pool.inner.name, pool.inner.size
    );
    Ok(pool)
  }
}

struct PoolState {
  queue: VecDeque<Job>,
  run_state: RunState,
  stopping: bool,
  alive: usize,
  busy: HashMap<usize, Interruptor>,
  // Jobs running inline on submitting threads under `CallerRuns`.
  callers: HashMap<u64, Interruptor>,
  next_caller: u64,
  completed: u64,
}

impl PoolState {
  fn in_flight(&self) -> usize {
    self.busy.len() + self.callers.len()
  }

  /// Moves a shut down pool to `Terminated` once no thread can run a job of it
  /// anymore.
  fn try_terminate(&mut self, name: &str) {
    if self.run_state == RunState::ShuttingDown && self.alive == 0 && self.callers.is_empty() {
      self.run_state = RunState::Terminated;
      debug!("pool '{}' terminated", name);
    }
  }
}

struct PoolInner {
  name: String,
  size: usize,
  capacity: Option<usize>,
  saturation: SaturationPolicy,
  monitor: Arc<Monitor<PoolState>>,
}

/// Keeps the pool's bookkeeping right however a worker thread exits.
struct WorkerGuard<'a> {
  inner: &'a PoolInner,
  index: usize,
}

impl Drop for WorkerGuard<'_> {
  fn drop(&mut self) {
    if std::thread::panicking() {
      error!("worker {} of pool '{}' panicked", self.index, self.inner.name);
    }
    let mut state = self.inner.monitor.lock();
    state.busy.remove(&self.index);
    state.alive -= 1;
    state.try_terminate(&self.inner.name);
    self.inner.monitor.notify_all();
  }
}

/// Tracks a job running inline on its submitting thread.
struct CallerGuard<'a> {
  inner: &'a PoolInner,
  key: u64,
}

impl Drop for CallerGuard<'_> {
  fn drop(&mut self) {
    let mut state = self.inner.monitor.lock();
    state.callers.remove(&self.key);
    state.completed += 1;
    state.try_terminate(&self.inner.name);
    self.inner.monitor.notify_all();
  }
}

fn run_worker(inner: Arc<PoolInner>, index: usize) {
  let _guard = WorkerGuard {
    inner: &inner,
    index,
  };
  trace!("worker {} of pool '{}' started", index, inner.name);
  while let Some(job) = next_job(&inner, index) {
    job.run();
    let mut state = inner.monitor.lock();
    state.busy.remove(&index);
    state.completed += 1;
  }
  trace!("worker {} of pool '{}' exiting", index, inner.name);
}

fn next_job(inner: &PoolInner, index: usize) -> Option<Job> {
  let mut state = inner.monitor.lock();
  loop {
    if state.stopping {
      return None;
    }
    if let Some(job) = state.queue.pop_front() {
      // A stale interrupt aimed at the previous job must not leak into this one.
      interrupt::clear();
      state.busy.insert(index, interrupt::current());
      return Some(job);
    }
    if state.run_state != RunState::Running {
      return None;
    }
    state = inner.monitor.wait(state);
  }
}

/// A fixed number of threads pulling jobs from a shared queue.
///
/// Dropping the pool requests a graceful shutdown, queued jobs still run.
///
/// # Example
/// ```
/// use conductor::sync::threadpool::ThreadPoolBuilder;
/// use conductor::sync::service::ExecutorService;
/// use std::time::Duration;
///
/// let pool = ThreadPoolBuilder::named("example").size(2).build().unwrap();
/// let service = ExecutorService::from(pool);
/// let handle = service.submit_fn(|| 2 + 2).unwrap();
/// assert_eq!(handle.get().unwrap(), 4);
/// service.shutdown();
/// assert!(service.await_termination(Duration::from_secs(5)).unwrap());
/// ```
pub struct ThreadPool {
  inner: Arc<PoolInner>,
}

impl ThreadPool {
  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn size(&self) -> usize {
    self.inner.size
  }

  pub fn capacity(&self) -> Option<usize> {
    self.inner.capacity
  }

  pub fn queued(&self) -> usize {
    self.inner.monitor.lock().queue.len()
  }

  /// Number of jobs currently running.
  pub fn active(&self) -> usize {
    self.inner.monitor.lock().in_flight()
  }

  pub fn completed(&self) -> u64 {
    self.inner.monitor.lock().completed
  }

  pub fn idle(&self) -> bool {
    let state = self.inner.monitor.lock();
    state.queue.is_empty() && state.in_flight() == 0
  }
}

impl Executor for ThreadPool {
  fn execute(&self, job: Job) -> Result<()> {
    let mut state = self.inner.monitor.lock();
    if state.run_state != RunState::Running {
      debug!("pool '{}' rejected job {}: shut down", self.inner.name, job.id());
      return Err(Error::Rejected(RejectReason::Shutdown));
    }
    if let Some(capacity) = self.inner.capacity {
      if state.queue.len() >= capacity {
        match self.inner.saturation {
          SaturationPolicy::Reject => {
            debug!("pool '{}' rejected job {}: saturated", self.inner.name, job.id());
            return Err(Error::Rejected(RejectReason::Saturated));
          }
          SaturationPolicy::CallerRuns => {
            // Registered before the lock is released so that termination
            // waits for the inline run and `shutdown_now` can interrupt it.
            let key = state.next_caller;
            state.next_caller += 1;
            state.callers.insert(key, interrupt::current());
            drop(state);
            let _caller = CallerGuard {
              inner: &self.inner,
              key,
            };
            trace!("pool '{}' saturated, running job {} inline", self.inner.name, job.id());
            job.run();
            return Ok(());
          }
        }
      }
    }
    state.queue.push_back(job);
    self.inner.monitor.notify_all();
    Ok(())
  }

  fn shutdown(&self) {
    let mut state = self.inner.monitor.lock();
    if state.run_state == RunState::Running {
      debug!("pool '{}' shutting down", self.inner.name);
      state.run_state = RunState::ShuttingDown;
    }
    state.try_terminate(&self.inner.name);
    self.inner.monitor.notify_all();
  }

  fn shutdown_now(&self) -> Vec<Job> {
    let (running, drained): (Vec<Interruptor>, Vec<Job>) = {
      let mut state = self.inner.monitor.lock();
      if state.run_state == RunState::Running {
        state.run_state = RunState::ShuttingDown;
      }
      if !state.stopping {
        debug!(
          "pool '{}' stopping, interrupting {} running jobs",
          self.inner.name,
          state.in_flight()
        );
        state.stopping = true;
      }
      state.try_terminate(&self.inner.name);
      self.inner.monitor.notify_all();
      (
        state
          .busy
          .values()
          .chain(state.callers.values())
          .cloned()
          .collect(),
        state.queue.drain(..).collect(),
      )
    };
    // Outside the pool lock: a running job may itself be parked on this pool.
    // Workers no longer pick up jobs once `stopping` is set, so the interrupt
    // cannot land on a later job. A submitting thread running a job inline
    // keeps its interrupt flag set once the job returns.
    for interruptor in running {
      interruptor.interrupt();
    }
    for job in &drained {
      job.cancel(false);
    }
    drained
  }

  fn run_state(&self) -> RunState {
    self.inner.monitor.lock().run_state
  }

  fn await_termination(&self, deadline: Option<Instant>) -> Result<bool> {
    let monitor = &self.inner.monitor;
    let guard = monitor.lock();
    let (_guard, terminated) =
      monitor.wait_until(guard, deadline, |state| state.run_state == RunState::Terminated)?;
    Ok(terminated)
  }

  fn scheduler_type(&self) -> SchedulerType {
    SchedulerType::Pool(self.inner.size)
  }
}

impl Drop for ThreadPool {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::sync::handle::{TaskHandle, TaskState};
  use crate::sync::monitor::deadline;
  use crate::sync::task::Task;
  use crate::utils::testing::async_context;

  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::mpsc;
  use std::time::Duration;

  fn job<T: crate::sync::task::TaskType>(task: Task<T>) -> (TaskHandle<T>, Job) {
    TaskHandle::new(task)
  }

  #[test]
  fn builder_defaults_test() {
    let pool = ThreadPoolBuilder::named("defaults").build().unwrap();
    assert_eq!(pool.size(), num_cpus::get());
    assert_eq!(pool.capacity(), None);
    assert_eq!(pool.name(), "defaults");
    assert_eq!(pool.run_state(), RunState::Running);
  }

  #[test]
  fn invalid_configuration_test() {
    assert!(matches!(
      ThreadPoolBuilder::new().size(0).build(),
      Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
      ThreadPoolBuilder::new().size(1).capacity(0).build(),
      Err(Error::InvalidArgument(_))
    ));
  }

  #[test]
  fn runs_jobs_test() {
    async_context(|| {
      let pool = ThreadPoolBuilder::named("runs").size(3).build().unwrap();
      let handles: Vec<_> = (0..10)
        .map(|i| {
          let (handle, job) = job(Task::from_fn(move || i * 2));
          pool.execute(job).unwrap();
          handle
        })
        .collect();
      for (i, handle) in handles.iter().enumerate() {
        assert_eq!(handle.get().unwrap(), i * 2);
      }
      pool.shutdown();
      assert!(pool.await_termination(None).unwrap());
      assert_eq!(pool.completed(), 10);
      assert!(pool.idle());
    });
  }

  #[test]
  fn shutdown_drains_queue_test() {
    async_context(|| {
      let pool = ThreadPoolBuilder::named("drain").size(1).build().unwrap();
      let (gate_tx, gate_rx) = mpsc::channel::<()>();
      let (first, blocker) = job(Task::runnable(move || {
        gate_rx.recv().unwrap();
      }));
      let (second, queued) = job(Task::from_fn(|| "drained"));
      pool.execute(blocker).unwrap();
      pool.execute(queued).unwrap();
      pool.shutdown();
      assert_eq!(pool.run_state(), RunState::ShuttingDown);
      let (_, rejected) = job(Task::from_fn(|| ()));
      assert!(matches!(
        pool.execute(rejected),
        Err(Error::Rejected(RejectReason::Shutdown))
      ));
      gate_tx.send(()).unwrap();
      assert!(pool.await_termination(None).unwrap());
      assert_eq!(first.state(), TaskState::Completed);
      assert_eq!(second.get().unwrap(), "drained");
      assert_eq!(pool.run_state(), RunState::Terminated);
    });
  }

  #[test]
  fn shutdown_now_returns_unstarted_test() {
    async_context(|| {
      let pool = ThreadPoolBuilder::named("stop").size(1).build().unwrap();
      let (started_tx, started_rx) = mpsc::channel();
      let (running, blocker) = job(Task::from_fn(move || {
        started_tx.send(()).unwrap();
        while !interrupt::is_interrupted() {
          std::thread::sleep(Duration::from_millis(1));
        }
        "interrupted"
      }));
      pool.execute(blocker).unwrap();
      started_rx.recv().unwrap();
      let queued: Vec<_> = (0..3)
        .map(|i| {
          let (handle, job) = job(Task::from_fn(move || i));
          pool.execute(job).unwrap();
          handle
        })
        .collect();
      let drained = pool.shutdown_now();
      assert_eq!(
        drained.iter().map(Job::id).collect::<Vec<_>>(),
        queued.iter().map(TaskHandle::id).collect::<Vec<_>>()
      );
      assert!(drained.iter().all(Job::is_cancelled));
      assert!(queued.iter().all(TaskHandle::is_cancelled));
      assert!(pool.await_termination(None).unwrap());
      assert_eq!(running.get().unwrap(), "interrupted");
      assert!(pool.shutdown_now().is_empty());
    });
  }

  #[test]
  fn saturation_reject_test() {
    async_context(|| {
      let pool = ThreadPoolBuilder::named("bounded")
        .size(1)
        .capacity(1)
        .build()
        .unwrap();
      let (started_tx, started_rx) = mpsc::channel();
      let (gate_tx, gate_rx) = mpsc::channel::<()>();
      let (_, blocker) = job(Task::runnable(move || {
        started_tx.send(()).unwrap();
        gate_rx.recv().unwrap();
      }));
      pool.execute(blocker).unwrap();
      started_rx.recv().unwrap();
      let (_, queued) = job(Task::from_fn(|| 1));
      pool.execute(queued).unwrap();
      let (_, overflow) = job(Task::from_fn(|| 2));
      assert!(matches!(
        pool.execute(overflow),
        Err(Error::Rejected(RejectReason::Saturated))
      ));
      gate_tx.send(()).unwrap();
    });
  }

  #[test]
  fn saturation_caller_runs_test() {
    async_context(|| {
      let pool = ThreadPoolBuilder::named("caller")
        .size(1)
        .capacity(1)
        .saturation(SaturationPolicy::CallerRuns)
        .build()
        .unwrap();
      let (started_tx, started_rx) = mpsc::channel();
      let (gate_tx, gate_rx) = mpsc::channel::<()>();
      let (_, blocker) = job(Task::runnable(move || {
        started_tx.send(()).unwrap();
        gate_rx.recv().unwrap();
      }));
      pool.execute(blocker).unwrap();
      started_rx.recv().unwrap();
      let (_, queued) = job(Task::from_fn(|| ()));
      pool.execute(queued).unwrap();
      let caller = std::thread::current().id();
      let (overflow, inline) = job(Task::from_fn(move || std::thread::current().id() == caller));
      pool.execute(inline).unwrap();
      assert!(overflow.is_done());
      assert!(overflow.get().unwrap());
      gate_tx.send(()).unwrap();
    });
  }

  fn saturated_caller_pool(name: &str) -> (Arc<ThreadPool>, mpsc::Sender<()>) {
    let pool = ThreadPoolBuilder::named(name)
      .size(1)
      .capacity(1)
      .saturation(SaturationPolicy::CallerRuns)
      .build()
      .unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (_, blocker) = job(Task::runnable(move || {
      started_tx.send(()).unwrap();
      gate_rx.recv().unwrap();
    }));
    pool.execute(blocker).unwrap();
    started_rx.recv().unwrap();
    let (_, queued) = job(Task::from_fn(|| ()));
    pool.execute(queued).unwrap();
    (Arc::new(pool), gate_tx)
  }

  #[test]
  fn caller_runs_job_delays_termination_test() {
    async_context(|| {
      let (pool, gate_tx) = saturated_caller_pool("caller-drain");
      let (started_tx, started_rx) = mpsc::channel();
      let (release_tx, release_rx) = mpsc::channel::<()>();
      let finished = Arc::new(AtomicBool::new(false));
      let cloned = finished.clone();
      let (inline_handle, inline) = job(Task::runnable(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        cloned.store(true, Ordering::SeqCst);
      }));
      let submitter = {
        let pool = pool.clone();
        std::thread::spawn(move || pool.execute(inline))
      };
      started_rx.recv().unwrap();
      gate_tx.send(()).unwrap();
      pool.shutdown();
      assert!(!pool
        .await_termination(deadline(Duration::from_millis(50)))
        .unwrap());
      assert_eq!(pool.run_state(), RunState::ShuttingDown);
      assert!(!finished.load(Ordering::SeqCst));
      release_tx.send(()).unwrap();
      assert!(pool.await_termination(None).unwrap());
      assert!(finished.load(Ordering::SeqCst));
      assert_eq!(inline_handle.state(), TaskState::Completed);
      submitter.join().unwrap().unwrap();
    });
  }

  #[test]
  fn shutdown_now_interrupts_caller_runs_job_test() {
    async_context(|| {
      let (pool, gate_tx) = saturated_caller_pool("caller-stop");
      let (started_tx, started_rx) = mpsc::channel();
      let (inline_handle, inline) = job(Task::from_fn(move || {
        started_tx.send(()).unwrap();
        while !interrupt::is_interrupted() {
          std::thread::sleep(Duration::from_millis(1));
        }
        "interrupted"
      }));
      let submitter = {
        let pool = pool.clone();
        std::thread::spawn(move || pool.execute(inline))
      };
      started_rx.recv().unwrap();
      gate_tx.send(()).unwrap();
      pool.shutdown_now();
      assert!(pool.await_termination(None).unwrap());
      assert_eq!(inline_handle.get().unwrap(), "interrupted");
      submitter.join().unwrap().unwrap();
    });
  }

  #[test]
  fn await_termination_timeout_test() {
    async_context(|| {
      let pool = ThreadPoolBuilder::named("await").size(1).build().unwrap();
      assert!(!pool
        .await_termination(deadline(Duration::from_millis(20)))
        .unwrap());
      pool.shutdown();
      assert!(pool.await_termination(None).unwrap());
    });
  }
}
