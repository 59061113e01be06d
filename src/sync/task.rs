use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub trait TaskType: Send + Clone + 'static {}
impl<T> TaskType for T where T: Send + Clone + 'static {}

/// The failure captured from a task body.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
  #[error("{0}")]
  Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),
  #[error("task panicked: {0}")]
  Panicked(String),
}

impl TaskError {
  pub fn failed<E>(error: E) -> Self
  where
    E: Into<BoxError>,
  {
    TaskError::Failed(Arc::from(error.into()))
  }

  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
      (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
      message.clone()
    } else {
      "unknown panic payload".to_owned()
    };
    TaskError::Panicked(message)
  }
}

type Body<T> = Box<dyn FnOnce() -> Result<T, TaskError> + Send + 'static>;

/// A deferred computation producing a `T` or failing.
///
/// A task is either a callable, whose closure returns a `Result`, or a
/// runnable paired with a fixed result that is handed back once the effect
/// has run. Nothing happens until an executor runs it.
///
/// # Example
/// ```
/// use conductor::sync::task::Task;
///
/// let answer = Task::from_fn(|| 6 * 7);
/// let parse = Task::new(|| "42".parse::<i32>());
/// let effect = Task::runnable(|| println!("side effect"));
/// let tagged = Task::with_result(|| println!("side effect"), "done");
/// # let _ = (answer, parse, effect, tagged);
/// ```
pub struct Task<T> {
  name: Option<String>,
  body: Body<T>,
}

impl<T> Task<T>
where
  T: TaskType,
{
  /// A callable task. An `Err` returned by `body` is captured as
  /// [TaskError::Failed].
  pub fn new<F, E>(body: F) -> Self
  where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    E: Into<BoxError>,
  {
    Task {
      name: None,
      body: Box::new(move || body().map_err(TaskError::failed)),
    }
  }

  /// A callable that cannot fail other than by panicking.
  pub fn from_fn<F>(body: F) -> Self
  where
    F: FnOnce() -> T + Send + 'static,
  {
    Task {
      name: None,
      body: Box::new(move || Ok(body())),
    }
  }

  /// An effect-only task yielding `result` once `body` has run.
  pub fn with_result<F>(body: F, result: T) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    Task {
      name: None,
      body: Box::new(move || {
        body();
        Ok(result)
      }),
    }
  }

  pub fn named<S: Into<String>>(mut self, name: S) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub(crate) fn take_name(&mut self) -> Option<String> {
    self.name.take()
  }

  /// Runs the body on the calling thread, turning a panic into
  /// [TaskError::Panicked].
  pub(crate) fn call(self) -> Result<T, TaskError> {
    let body = self.body;
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
      Err(TaskError::from_panic(payload))
    })
  }
}

impl Task<()> {
  pub fn runnable<F>(body: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    Task::with_result(body, ())
  }
}

impl<T> Debug for Task<T> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Task").field("name", &self.name).finish()
  }
}
