use crate::sync::task::TaskError;

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use thiserror::Error;

/// Why an executor refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
  /// Shutdown has been requested, no new work is accepted.
  Shutdown,
  /// The bounded queue is full and the saturation policy is `Reject`.
  Saturated,
}

impl Display for RejectReason {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      RejectReason::Shutdown => write!(f, "executor is shut down"),
      RejectReason::Saturated => write!(f, "executor queue is full"),
    }
  }
}

#[derive(Error, Debug, Clone)]
pub enum Error {
  #[error("task rejected: {0}")]
  Rejected(RejectReason),

  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),

  #[error("task failed: {0}")]
  Execution(TaskError),

  #[error("task was cancelled")]
  Cancelled,

  #[error("timed out")]
  Timeout,

  #[error("wait interrupted")]
  Interrupted,

  #[error("all {} tasks failed", .0.len())]
  AllFailed(Vec<Error>),

  #[error("barrier is broken")]
  BrokenBarrier,

  #[error("failed to spawn worker thread: {0}")]
  Spawn(Arc<std::io::Error>),
}

impl Error {
  pub fn is_rejected(&self) -> bool {
    matches!(self, Error::Rejected(_))
  }
}

impl From<std::io::Error> for Error {
  fn from(error: std::io::Error) -> Self {
    Error::Spawn(Arc::new(error))
  }
}

pub type Result<T> = std::result::Result<T, Error>;
