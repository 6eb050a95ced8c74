//! # Amaranth ECS
//!
//! Conflict-aware system scheduler for the Amaranth engine.
//!
//! Systems declare the data they touch; the scheduler turns those
//! declarations into a dependency graph and runs each tick as a set of
//! interlocked tasks on the [`amaranth-core`](amaranth_core) runtime.
//!
//! ## Core Types
//!
//! - [`DataAccess`] / [`AccessList`] — What a system reads and writes
//! - [`SystemObject`] — An executor plus its access declaration
//! - [`Stage`] / [`StageLabel`] — Buckets of systems registered together
//! - [`Scheduler`] — Compiles stage sequences and runs ticks
//! - [`Context`] — Dependency-injection bag handed to executors
//!
//! ## How systems are ordered
//!
//! Two systems conflict when one writes data the other touches (same
//! source, overlapping section, neither thread-safe). Conflicts across
//! stage boundaries order the earlier stage's system first; conflicts
//! within a stage are serialized in registration order, adjusted by
//! explicit order edges. The compiled graph is topologically ordered and
//! transitively reduced, then cached per stage sequence.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use amaranth_core::{sync_wait, Task};
//! use amaranth_ecs::{
//!     AccessList, Context, Reads, Scheduler, StageLabel, SystemObject, Writes,
//! };
//!
//! struct Registry;
//! struct Position;
//!
//! struct Update;
//! impl StageLabel for Update {}
//!
//! let mut scheduler = Scheduler::new();
//!
//! // Runs first: writes positions.
//! scheduler.add_system::<Update>(SystemObject::new(
//!     |context| {
//!         Task::new(async move {
//!             context.expect::<Arc<AtomicUsize>>().fetch_add(1, Ordering::SeqCst);
//!         })
//!     },
//!     AccessList::of::<Writes<Registry, Position>>(),
//! ));
//!
//! // Runs after the writer: reads positions.
//! scheduler.add_system::<Update>(SystemObject::new(
//!     |context| {
//!         Task::new(async move {
//!             context.expect::<Arc<AtomicUsize>>().fetch_add(1, Ordering::SeqCst);
//!         })
//!     },
//!     AccessList::of::<Reads<Registry, Position>>(),
//! ));
//!
//! let counter = Arc::new(AtomicUsize::new(0));
//! let mut context = Context::new();
//! context.insert(counter.clone());
//! let context = Arc::new(context);
//!
//! scheduler.schedule::<Update>();
//! sync_wait(scheduler.run_all(&context).unwrap());
//!
//! assert_eq!(counter.load(Ordering::SeqCst), 2);
//! ```

mod access;
mod context;
mod graph;
mod scheduler;
mod stage;
mod system;

pub use access::{
    AccessDecl, AccessList, DataAccess, Reads, ReadsAll, Synchronized, Writes, WritesAll,
};
pub use context::Context;
pub use graph::ScheduleError;
pub use scheduler::Scheduler;
pub use stage::{Stage, StageLabel};
pub use system::{SystemFn, SystemId, SystemObject};
