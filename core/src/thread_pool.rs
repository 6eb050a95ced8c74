use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// Pool of worker threads that resume scheduled continuations.
///
/// The pool is built for compute parallelization, not io: its only API is
/// [`schedule()`](ThreadPool::schedule), an awaitable that moves the
/// awaiting task onto a worker thread. Idle workers sleep on a condition
/// variable and use no CPU.
///
/// Continuations are taken from the queue in FIFO order, but since workers
/// resume them concurrently no ordering is guaranteed between resumed
/// bodies. Any worker may resume any continuation.
///
/// Dropping the pool shuts it down: remaining queued continuations are
/// drained, then the workers are joined. Scheduling onto a pool that is
/// shutting down is a programmer error and panics.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use amaranth_core::{sync_wait, Task, ThreadPool};
///
/// let pool = Arc::new(ThreadPool::new(4, false));
///
/// let p = pool.clone();
/// let task = Task::new(async move {
///     p.schedule().await;
///     // Runs on a worker from here on.
///     2 + 2
/// });
///
/// assert_eq!(sync_wait(task), 4);
/// ```
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    thread_count: usize,
}

impl ThreadPool {
    /// Creates a pool with `thread_count` workers.
    ///
    /// When `lock_threads` is set, worker `i` is pinned to logical CPU
    /// `i mod n`. Pinning is best-effort: failure is logged, never fatal.
    ///
    /// # Panics
    ///
    /// Panics if `thread_count` is zero.
    pub fn new(thread_count: usize, lock_threads: bool) -> Self {
        assert!(thread_count >= 1, "thread pool requires at least one worker");

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                running: true,
            }),
            work_available: Condvar::new(),
        });

        let cores = if lock_threads {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let workers = (0..thread_count)
            .map(|index| {
                let shared = shared.clone();
                let core = if cores.is_empty() {
                    None
                } else {
                    Some(cores[index % cores.len()])
                };
                std::thread::Builder::new()
                    .name(format!("amaranth-worker-{index}"))
                    .spawn(move || worker_loop(shared, core))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            workers,
            thread_count,
        }
    }

    /// Creates a pool sized to the available logical CPUs, with workers
    /// locked to cores.
    ///
    /// The `AMARANTH_NUM_THREADS` environment variable overrides the size.
    pub fn default_threads() -> Self {
        let threads = std::env::var("AMARANTH_NUM_THREADS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|&threads| threads >= 1)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));
        Self::new(threads, true)
    }

    /// Returns the number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Returns an awaitable that reschedules the awaiting task onto a
    /// worker thread.
    ///
    /// Always suspends: the caller's continuation is enqueued and some
    /// worker resumes it.
    pub fn schedule(&self) -> Schedule<'_> {
        Schedule {
            shared: &self.shared,
            queued: false,
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::default_threads()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
        }
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("thread pool worker panicked during shutdown");
            }
        }
    }
}

/// Awaitable returned by [`ThreadPool::schedule`].
pub struct Schedule<'a> {
    shared: &'a PoolShared,
    queued: bool,
}

impl Future for Schedule<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.queued {
            return Poll::Ready(());
        }
        self.queued = true;
        self.shared.enqueue(cx.waker().clone());
        Poll::Pending
    }
}

struct PoolState {
    queue: VecDeque<Waker>,
    running: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_available: Condvar,
}

impl PoolShared {
    fn enqueue(&self, waker: Waker) {
        {
            let mut state = self.state.lock();
            assert!(state.running, "schedule() on a shut down thread pool");
            state.queue.push_back(waker);
        }
        // Enqueue, unlock, then notify: a worker that wakes always finds
        // the queue entry or another worker already took it.
        self.work_available.notify_one();
    }
}

fn worker_loop(shared: Arc<PoolShared>, core: Option<core_affinity::CoreId>) {
    if let Some(core) = core {
        if !core_affinity::set_for_current(core) {
            log::warn!("failed to pin worker thread to core {}", core.id);
        }
    }

    let mut state = shared.state.lock();
    loop {
        if let Some(waker) = state.queue.pop_front() {
            // Resume outside the lock so other workers keep dequeuing.
            drop(state);
            waker.wake();
            state = shared.state.lock();
        } else if state.running {
            // Rechecks the queue and the running flag on every wake-up,
            // spurious or not.
            shared.work_available.wait(&mut state);
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sync_wait, when_all, Task};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn thread_count_matches_construction() {
        let pool = ThreadPool::new(4, false);
        assert_eq!(pool.thread_count(), 4);
    }

    #[test]
    fn one_worker_runs_a_scheduled_task() {
        let pool = Arc::new(ThreadPool::new(1, false));
        let count = Arc::new(AtomicUsize::new(0));

        let p = pool.clone();
        let c = count.clone();
        let task = Task::new(async move {
            p.schedule().await;
            c.fetch_add(1, Ordering::SeqCst);
        });

        sync_wait(task);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn many_workers_run_a_scheduled_task() {
        let pool = Arc::new(ThreadPool::new(16, false));
        let count = Arc::new(AtomicUsize::new(0));

        let p = pool.clone();
        let c = count.clone();
        let task = Task::new(async move {
            p.schedule().await;
            c.fetch_add(1, Ordering::SeqCst);
        });

        sync_wait(task);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn many_tasks_all_complete() {
        let pool = Arc::new(ThreadPool::new(8, false));
        let count = Arc::new(AtomicUsize::new(0));
        const AMOUNT: usize = 500;

        let tasks: Vec<Task<()>> = (0..AMOUNT)
            .map(|_| {
                let pool = pool.clone();
                let count = count.clone();
                Task::new(async move {
                    pool.schedule().await;
                    count.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        sync_wait(when_all(tasks));
        assert_eq!(count.load(Ordering::SeqCst), AMOUNT);
    }

    #[test]
    fn single_worker_interleaves_tasks() {
        // With one worker, tasks still make progress concurrently because
        // every schedule() is a yield point.
        let pool = Arc::new(ThreadPool::new(1, false));
        let count = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task<()>> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let count = count.clone();
                Task::new(async move {
                    pool.schedule().await;
                    count.fetch_add(1, Ordering::SeqCst);
                    pool.schedule().await;
                    count.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        sync_wait(when_all(tasks));
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn locked_threads_still_execute() {
        let pool = Arc::new(ThreadPool::new(2, true));
        let count = Arc::new(AtomicUsize::new(0));

        let p = pool.clone();
        let c = count.clone();
        let task = Task::new(async move {
            p.schedule().await;
            c.fetch_add(1, Ordering::SeqCst);
        });

        sync_wait(task);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
