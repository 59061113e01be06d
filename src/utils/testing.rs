//! Helpers for tests exercising blocking code: a hung wait fails the test
//! instead of hanging the whole run.
use std::{sync::mpsc, thread, time::Duration};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `f` on a fresh thread and panics if it does not finish within `d`.
///
/// Running on a fresh thread also gives `f` a clean interrupt flag.
pub fn panic_after<T, F>(d: Duration, f: F) -> T
where
  T: Send + 'static,
  F: FnOnce() -> T + Send + 'static,
{
  let (done_tx, done_rx) = mpsc::channel();
  let handle = thread::Builder::new()
    .name("testing-thread".to_owned())
    .spawn(move || {
      let val = f();
      let _ = done_tx.send(());
      val
    })
    .expect("failed to spawn testing thread");
  match done_rx.recv_timeout(d) {
    Ok(_) => handle.join().expect("thread panicked"),
    Err(mpsc::RecvTimeoutError::Timeout) => panic!("thread took too long"),
    Err(mpsc::RecvTimeoutError::Disconnected) => match handle.join() {
      Ok(_) => unreachable!("completion signal lost"),
      Err(payload) => std::panic::resume_unwind(payload),
    },
  }
}

pub fn async_context<T, F>(f: F) -> T
where
  T: Send + 'static,
  F: FnOnce() -> T + Send + 'static,
{
  panic_after(DEFAULT_TIMEOUT, f)
}

/// Polls `condition` until it holds, panicking after [DEFAULT_TIMEOUT].
pub fn eventually<F>(mut condition: F)
where
  F: FnMut() -> bool,
{
  let start = std::time::Instant::now();
  while !condition() {
    if start.elapsed() > DEFAULT_TIMEOUT {
      panic!("condition never became true");
    }
    thread::sleep(Duration::from_millis(1));
  }
}
