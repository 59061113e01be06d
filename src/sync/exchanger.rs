use super::monitor::{self, Monitor};
use crate::error::{Error, Result};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ExchangeState<T> {
  next_ticket: u64,
  parked: Option<(u64, T)>,
  replies: HashMap<u64, T>,
}

/// A rendezvous where two threads swap values.
///
/// The first thread to arrive parks its value and waits; the second takes it
/// and leaves its own value behind for the first. Pairs are formed in arrival
/// order, so the exchanger can be reused for any number of rounds.
///
/// # Example
/// ```
/// use conductor::sync::exchanger::Exchanger;
///
/// let exchanger = Exchanger::new();
/// let other = exchanger.clone();
/// let producer = std::thread::spawn(move || other.exchange(100).unwrap());
/// assert_eq!(exchanger.exchange(0).unwrap(), 100);
/// assert_eq!(producer.join().unwrap(), 0);
/// ```
pub struct Exchanger<T> {
  monitor: Arc<Monitor<ExchangeState<T>>>,
}

impl<T> Clone for Exchanger<T> {
  fn clone(&self) -> Self {
    Exchanger {
      monitor: self.monitor.clone(),
    }
  }
}

impl<T> Default for Exchanger<T>
where
  T: Send + 'static,
{
  fn default() -> Self {
    Exchanger {
      monitor: Monitor::new(ExchangeState {
        next_ticket: 0,
        parked: None,
        replies: HashMap::new(),
      }),
    }
  }
}

impl<T> Exchanger<T>
where
  T: Send + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Waits for another thread to arrive, then swaps values with it.
  ///
  /// # Errors
  ///
  /// [Error::Interrupted] if the calling thread is interrupted before a
  /// partner shows up; `value` is dropped.
  pub fn exchange(&self, value: T) -> Result<T> {
    self.exchange_until(value, None)
  }

  /// Like [Exchanger::exchange], failing with [Error::Timeout] if no partner
  /// arrived within `timeout`.
  pub fn exchange_timeout(&self, value: T, timeout: Duration) -> Result<T> {
    self.exchange_until(value, monitor::deadline(timeout))
  }

  fn exchange_until(&self, value: T, deadline: Option<Instant>) -> Result<T> {
    let mut state = self.monitor.lock();
    if let Some((ticket, offered)) = state.parked.take() {
      state.replies.insert(ticket, value);
      self.monitor.notify_all();
      return Ok(offered);
    }
    let ticket = state.next_ticket;
    state.next_ticket += 1;
    state.parked = Some((ticket, value));
    let outcome = self
      .monitor
      .wait_until(state, deadline, |state| state.replies.contains_key(&ticket));
    let (mut state, failure) = match outcome {
      Ok((state, true)) => (state, None),
      Ok((state, false)) => (state, Some(Error::Timeout)),
      Err(error) => (self.monitor.lock(), Some(error)),
    };
    if let Some(reply) = state.replies.remove(&ticket) {
      return Ok(reply);
    }
    if matches!(&state.parked, Some((parked, _)) if *parked == ticket) {
      state.parked = None;
    }
    Err(failure.unwrap_or(Error::Interrupted))
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::sync::interrupt;
  use crate::utils::testing::async_context;

  use std::sync::mpsc;

  #[test]
  fn exchange_either_order_test() {
    async_context(|| {
      for first_offers_hundred in [true, false].iter() {
        let exchanger = Exchanger::new();
        let (a_value, b_value) = if *first_offers_hundred { (100, 0) } else { (0, 100) };
        let cloned = exchanger.clone();
        let first = std::thread::spawn(move || cloned.exchange(a_value).unwrap());
        std::thread::sleep(Duration::from_millis(10));
        let second = exchanger.exchange(b_value).unwrap();
        assert_eq!(first.join().unwrap(), b_value);
        assert_eq!(second, a_value);
      }
    });
  }

  #[test]
  fn repeated_rounds_test() {
    async_context(|| {
      let exchanger = Exchanger::new();
      let cloned = exchanger.clone();
      let producer = std::thread::spawn(move || {
        (1..=5)
          .map(|i| cloned.exchange(i * 100).unwrap())
          .collect::<Vec<_>>()
      });
      let received: Vec<_> = (0..5).map(|_| exchanger.exchange(0).unwrap()).collect();
      assert_eq!(received, vec![100, 200, 300, 400, 500]);
      assert_eq!(producer.join().unwrap(), vec![0; 5]);
    });
  }

  #[test]
  fn many_pairs_lose_nothing_test() {
    async_context(|| {
      let exchanger = Exchanger::new();
      let threads: Vec<_> = (0..8)
        .map(|i| {
          let exchanger = exchanger.clone();
          std::thread::spawn(move || (i, exchanger.exchange(i).unwrap()))
        })
        .collect();
      let mut pairs: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
      pairs.sort_unstable();
      let mut received: Vec<_> = pairs.iter().map(|(_, got)| *got).collect();
      received.sort_unstable();
      assert_eq!(received, (0..8).collect::<Vec<_>>());
      for (sent, got) in pairs.iter() {
        assert_ne!(sent, got);
        assert_eq!(pairs[*got].1, *sent);
      }
    });
  }

  #[test]
  fn exchange_timeout_test() {
    async_context(|| {
      let exchanger = Exchanger::new();
      assert!(matches!(
        exchanger.exchange_timeout(1, Duration::from_millis(20)),
        Err(Error::Timeout)
      ));
      let cloned = exchanger.clone();
      let other = std::thread::spawn(move || cloned.exchange(2).unwrap());
      std::thread::sleep(Duration::from_millis(10));
      assert_eq!(exchanger.exchange(3).unwrap(), 2);
      assert_eq!(other.join().unwrap(), 3);
    });
  }

  #[test]
  fn exchange_interrupted_test() {
    async_context(|| {
      let exchanger = Exchanger::<u32>::new();
      let (tx, rx) = mpsc::channel();
      let cloned = exchanger.clone();
      let waiter = std::thread::spawn(move || {
        tx.send(interrupt::current()).unwrap();
        cloned.exchange(1)
      });
      let interruptor = rx.recv().unwrap();
      std::thread::sleep(Duration::from_millis(10));
      interruptor.interrupt();
      assert!(matches!(waiter.join().unwrap(), Err(Error::Interrupted)));
      assert!(matches!(
        exchanger.exchange_timeout(2, Duration::from_millis(0)),
        Err(Error::Timeout)
      ));
    });
  }
}
