use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use rand::distributions::{Distribution, Uniform};

/// Test-and-test-and-set lock with randomized exponential backoff.
///
/// Only meant for critical sections of a handful of instructions, it never
/// parks the calling thread.
pub(crate) struct SpinLock<T> {
  flag: AtomicBool,
  inner: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

pub(crate) struct SpinLockGuard<'a, T> {
  lock: &'a SpinLock<T>,
  _unsend: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for SpinLockGuard<'_, T> {}

impl<T> Drop for SpinLockGuard<'_, T> {
  fn drop(&mut self) {
    self.lock.flag.store(false, Ordering::Release);
  }
}

impl<T> Deref for SpinLockGuard<'_, T> {
  type Target = T;

  fn deref(&self) -> &Self::Target {
    unsafe { &*self.lock.inner.get() }
  }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    unsafe { &mut *self.lock.inner.get() }
  }
}

impl<T> SpinLock<T> {
  pub fn new(value: T) -> Self {
    SpinLock {
      flag: AtomicBool::new(false),
      inner: UnsafeCell::new(value),
    }
  }

  fn try_lock(&self) -> bool {
    !self.flag.load(Ordering::Relaxed)
      && self
        .flag
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
  }

  pub fn lock(&self) -> SpinLockGuard<'_, T> {
    if !self.try_lock() {
      let mut backoff = 1u32;
      let mut rng = rand::thread_rng();
      while !self.try_lock() {
        backoff = std::cmp::min(10, backoff + 1);
        let uniform = Uniform::from(0..(2u32.pow(backoff) - 1));
        for _ in 0..uniform.sample(&mut rng) {
          std::hint::spin_loop();
        }
      }
    }
    SpinLockGuard {
      lock: self,
      _unsend: PhantomData,
    }
  }
}
