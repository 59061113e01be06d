//! Conductor's execution and synchronization machinery.
//!
//! * `task` and `handle`: the unit of work and the caller's view of its outcome.
//! * `executor`, `threadpool`, `worker` and `blocking`: the engine trait and
//!   its implementations.
//! * `service`: the typed front end with lifecycle and bulk operations.
//! * `interrupt`: per-thread interruption honoured by every blocking call.
//! * `latch`, `barrier` and `exchanger`: rendezvous primitives.
pub mod barrier;
pub mod blocking;
pub mod exchanger;
pub mod executor;
pub mod handle;
pub mod interrupt;
pub mod latch;
mod monitor;
pub mod runtime;
pub mod scheduler;
pub mod service;
mod spinlock;
pub mod task;
pub mod threadpool;
pub mod worker;
