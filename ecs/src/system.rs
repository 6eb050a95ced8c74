use std::sync::Arc;

use amaranth_core::Task;

use crate::access::AccessList;
use crate::context::Context;

/// Signature of a system executor.
///
/// An executor builds the task for one run of the system. It receives a
/// shared handle to the [`Context`] so the task body can own what it needs
/// across suspension points. A body that wants to run on a worker thread
/// awaits a pool's `schedule()` itself; the scheduler never forces a hop.
pub type SystemFn = dyn Fn(Arc<Context>) -> Task<()> + Send + Sync;

/// Identifies a system within the stage it was registered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub(crate) usize);

/// A registered system: an executor plus its declared data accesses.
///
/// Immutable once registered into a stage. The access list is the sole
/// input to conflict analysis; the executor is the sole thing the
/// compiled schedule runs.
pub struct SystemObject {
    name: &'static str,
    executor: Arc<SystemFn>,
    access: AccessList,
}

impl SystemObject {
    /// Wraps an executor and its access declaration.
    ///
    /// The executor's type name is kept for diagnostics; override it with
    /// [`named()`](SystemObject::named) when the closure name is unhelpful.
    pub fn new<F>(executor: F, access: AccessList) -> Self
    where
        F: Fn(Arc<Context>) -> Task<()> + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<F>(),
            executor: Arc::new(executor),
            access,
        }
    }

    /// Sets the diagnostic name of this system.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn access(&self) -> &AccessList {
        &self.access
    }

    pub(crate) fn executor(&self) -> Arc<SystemFn> {
        self.executor.clone()
    }

    /// Returns whether this system must be ordered against `other`.
    ///
    /// True when any access of one conflicts with any access of the
    /// other; symmetric. A system can depend on itself this way (it
    /// writes non-thread-safe data), but the schedule compiler never
    /// emits self edges.
    pub fn has_dependency(&self, other: &SystemObject) -> bool {
        self.access.conflicts_with(other.access())
    }
}
