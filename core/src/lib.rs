//! # Amaranth Core
//!
//! Cooperative task runtime for the Amaranth engine.
//!
//! The runtime is a hybrid: a task runs single-threaded between its
//! suspension points, and tasks run in parallel across suspension points
//! via the thread pool. A task resumed on a worker keeps that worker only
//! until its next suspension.
//!
//! ## Core Types
//!
//! - [`Task`] — One-shot lazy asynchronous computation
//! - [`SharedTask`] — Refcounted task with many awaiters
//! - [`ThreadPool`] — Workers that resume scheduled continuations
//! - [`CounterTrigger`] / [`FlagTrigger`] — Fan-in primitives
//!
//! ## Combinators
//!
//! - [`when_all`] / [`when_both`] — Join collections of awaitables
//! - [`sync_wait`] — Block a thread on an awaitable (the only blocking
//!   wait in the runtime)
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use amaranth_core::{sync_wait, when_all, Task, ThreadPool};
//!
//! let pool = Arc::new(ThreadPool::new(4, false));
//! let count = Arc::new(AtomicUsize::new(0));
//!
//! let tasks: Vec<Task<()>> = (0..8)
//!     .map(|_| {
//!         let pool = pool.clone();
//!         let count = count.clone();
//!         Task::new(async move {
//!             pool.schedule().await;
//!             count.fetch_add(1, Ordering::SeqCst);
//!         })
//!     })
//!     .collect();
//!
//! sync_wait(when_all(tasks));
//! assert_eq!(count.load(Ordering::SeqCst), 8);
//! ```

mod backoff;
mod shared_task;
mod sync_wait;
mod task;
mod thread_pool;
mod trigger;
mod when_all;

pub use backoff::ExponentialBackoff;
pub use shared_task::{SharedTask, SharedWhenReady};
pub use sync_wait::sync_wait;
pub use task::{Task, WhenReady};
pub use thread_pool::{Schedule, ThreadPool};
pub use trigger::{CounterTrigger, FlagTrigger, Trigger};
pub use when_all::{when_all, when_both};
