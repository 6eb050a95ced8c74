use std::future::Future;
use std::sync::Arc;
use std::task::{Wake, Waker};

use parking_lot::{Condvar, Mutex};

use crate::task::Task;

/// Runs an awaitable to completion, blocking the calling thread.
///
/// This is the adapter from the asynchronous world back to synchronous
/// code, and the only place the runtime blocks an OS thread; every other
/// join is a task suspension.
///
/// The awaitable is wrapped in a task and started inline, so it runs on
/// the calling thread until its first suspension; later resumptions happen
/// on whichever threads complete its awaitables. The caller sleeps on a
/// condition variable until the result is published. Unbounded: a task
/// that never completes blocks forever.
///
/// A panic captured by the task is resumed on the calling thread.
///
/// # Example
///
/// ```
/// use amaranth_core::{sync_wait, Task};
///
/// let task = Task::new(async { 99 });
/// assert_eq!(sync_wait(task), 99);
/// ```
pub fn sync_wait<F>(awaitable: F) -> F::Output
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let task = Task::new(awaitable);
    task.start();

    if !task.is_ready() {
        let signal = Arc::new(SyncSignal::new());
        let waker = Waker::from(signal.clone());
        loop {
            if task.is_ready() {
                break;
            }
            task.install_continuation(&waker);
            // The completer may have missed the continuation; re-check
            // before sleeping.
            if task.is_ready() {
                break;
            }
            signal.wait();
        }
    }

    task.consume()
}

/// Mutex + condvar pair usable as a waker.
struct SyncSignal {
    set: Mutex<bool>,
    signal: Condvar,
}

impl SyncSignal {
    fn new() -> Self {
        Self {
            set: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Blocks until the signal is set, then clears it.
    fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.signal.wait(&mut set);
        }
        *set = false;
    }
}

impl Wake for SyncSignal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        *self.set.lock() = true;
        self.signal.notify_one();
    }
}
