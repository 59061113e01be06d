//! Conductor is:
//! * a thread based task execution service: submit work, get a handle to its
//!   outcome, cancel it, shut the service down gracefully or forcefully, and
//!   run batches of tasks with [invoke_all](sync::service::ExecutorService::invoke_all)
//!   and [invoke_any](sync::service::ExecutorService::invoke_any).
//! * a small set of interruptible synchronization primitives: a countdown
//!   latch, a cyclic barrier and a two-party exchanger.
#[macro_use]
extern crate lazy_static;

pub mod error;
pub mod sync;
pub mod utils;

pub use error::{Error, RejectReason, Result};
