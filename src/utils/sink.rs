//! Output sinks.
//!
//! Code that reports progress takes a `&dyn Sink` instead of printing, so the
//! same code can write to the console, to the log or into a [Recorder] a test
//! inspects afterwards.
use log::info;

use std::sync::{Mutex, PoisonError};

pub trait Sink: Send + Sync {
  fn emit(&self, line: &str);
}

/// Writes every line to standard output.
pub struct Stdout;

impl Sink for Stdout {
  fn emit(&self, line: &str) {
    println!("{}", line);
  }
}

/// Forwards every line to the `log` facade at info level.
pub struct Log;

impl Sink for Log {
  fn emit(&self, line: &str) {
    info!("{}", line);
  }
}

/// Keeps every line in memory.
#[derive(Default)]
pub struct Recorder {
  lines: Mutex<Vec<String>>,
}

impl Recorder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn lines(&self) -> Vec<String> {
    self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn count_matching(&self, needle: &str) -> usize {
    self
      .lines
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .filter(|line| line.contains(needle))
      .count()
  }
}

impl Sink for Recorder {
  fn emit(&self, line: &str) {
    self
      .lines
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(line.to_owned());
  }
}
