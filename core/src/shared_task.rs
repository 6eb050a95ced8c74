use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

const CREATED: u8 = 0;
const POLLING: u8 = 1;
const NOTIFIED: u8 = 2;
const SUSPENDED: u8 = 3;
const READY: u8 = 4;

type BoxBody<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A [`Task`](crate::Task) with shared ownership and many awaiters.
///
/// Cloning a shared task clones a handle to the same computation; the body
/// still runs exactly once. Every registered awaiter is resumed on
/// completion, and each receives a clone of the value (hence `T: Clone`).
///
/// If the body panicked, the panic payload is resumed into the first
/// awaiter that observes it; later awaiters panic with a generic message.
///
/// Used wherever many dependants wait on one computation, e.g. the steps of
/// a compiled system schedule.
pub struct SharedTask<T = ()> {
    raw: Arc<RawShared<T>>,
}

impl<T> Clone for SharedTask<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> SharedTask<T> {
    /// Creates a shared task around `body` without running it.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            raw: Arc::new(RawShared {
                state: AtomicU8::new(CREATED),
                body: Mutex::new(Some(Box::pin(body))),
                result: Mutex::new(None),
                continuations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Begins execution on the calling thread. Idempotent.
    pub fn start(&self) {
        self.raw.start();
    }

    /// Returns whether the result has been published.
    pub fn is_ready(&self) -> bool {
        self.raw.is_ready()
    }

    /// Returns an awaitable that completes when the task does, yielding `()`.
    ///
    /// Never clones the value and never re-raises a captured panic, which
    /// makes it the right probe for dependants that must run regardless of
    /// whether this task succeeded.
    pub fn when_ready(&self) -> SharedWhenReady<'_, T> {
        SharedWhenReady { raw: &self.raw }
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for SharedTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTask")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Future for SharedTask<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        self.raw.start();
        if self.raw.is_ready() {
            return Poll::Ready(self.raw.clone_value());
        }
        self.raw.push_continuation(cx.waker());
        if self.raw.is_ready() {
            return Poll::Ready(self.raw.clone_value());
        }
        Poll::Pending
    }
}

/// Awaitable returned by [`SharedTask::when_ready`].
pub struct SharedWhenReady<'a, T> {
    raw: &'a Arc<RawShared<T>>,
}

impl<T: Clone + Send + 'static> Future for SharedWhenReady<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.raw.is_ready() {
            return Poll::Ready(());
        }
        self.raw.push_continuation(cx.waker());
        if self.raw.is_ready() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

enum SharedResult<T> {
    Value(T),
    /// The payload is drained by the first observer.
    Panicked(Option<Box<dyn Any + Send>>),
}

struct RawShared<T> {
    state: AtomicU8,
    body: Mutex<Option<BoxBody<T>>>,
    result: Mutex<Option<SharedResult<T>>>,
    continuations: Mutex<Vec<Waker>>,
}

impl<T: Clone + Send + 'static> RawShared<T> {
    fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    fn push_continuation(&self, waker: &Waker) {
        self.continuations.lock().push(waker.clone());
    }

    fn clone_value(&self) -> T {
        // The lock is released before a captured panic is resumed.
        let outcome = {
            let mut slot = self.result.lock();
            match slot.as_mut() {
                Some(SharedResult::Value(value)) => Ok(value.clone()),
                Some(SharedResult::Panicked(payload)) => Err(payload.take()),
                None => unreachable!("shared task observed ready without a result"),
            }
        };
        match outcome {
            Ok(value) => value,
            Err(Some(payload)) => panic::resume_unwind(payload),
            Err(None) => panic!("shared task panicked"),
        }
    }

    fn start(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(CREATED, POLLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.drive();
        }
    }

    fn resume(self: &Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                SUSPENDED => {
                    if self
                        .state
                        .compare_exchange(SUSPENDED, POLLING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.drive();
                        return;
                    }
                }
                POLLING => {
                    if self
                        .state
                        .compare_exchange(POLLING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                CREATED => {
                    if self
                        .state
                        .compare_exchange(CREATED, POLLING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.drive();
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn drive(self: &Arc<Self>) {
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        loop {
            let polled = {
                let mut slot = self.body.lock();
                let body = match slot.as_mut() {
                    Some(body) => body,
                    None => return,
                };
                panic::catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx)))
            };
            match polled {
                Ok(Poll::Ready(value)) => {
                    self.complete(SharedResult::Value(value));
                    return;
                }
                Err(payload) => {
                    self.complete(SharedResult::Panicked(Some(payload)));
                    return;
                }
                Ok(Poll::Pending) => {
                    if self
                        .state
                        .compare_exchange(POLLING, SUSPENDED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                    self.state.store(POLLING, Ordering::Release);
                }
            }
        }
    }

    fn complete(&self, result: SharedResult<T>) {
        *self.body.lock() = None;
        *self.result.lock() = Some(result);
        self.state.store(READY, Ordering::Release);
        let continuations = std::mem::take(&mut *self.continuations.lock());
        for waker in continuations {
            waker.wake();
        }
    }
}

impl<T: Clone + Send + 'static> Wake for RawShared<T> {
    fn wake(self: Arc<Self>) {
        self.resume();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::Trigger;
    use crate::{sync_wait, Task};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn body_runs_once_across_clones() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let shared = SharedTask::new(async move {
            c.fetch_add(1, Ordering::SeqCst);
            5u32
        });

        let clone = shared.clone();
        shared.start();
        clone.start();

        assert!(shared.is_ready());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_awaiter_receives_the_value() {
        let shared = SharedTask::new(async { 9u32 });
        shared.start();

        let a = shared.clone();
        let b = shared.clone();
        let sum = Task::new(async move { a.await + b.await });

        assert_eq!(sync_wait(sum), 18);
    }

    #[test]
    fn awaiters_resume_when_dependency_completes() {
        let trigger = Arc::new(crate::CounterTrigger::new(1));
        let t = trigger.clone();
        let shared = SharedTask::new(async move {
            t.wait().await;
            1u32
        });
        shared.start();

        let waiters: Vec<Task<u32>> = (0..3)
            .map(|_| {
                let shared = shared.clone();
                let task = Task::new(async move { shared.await });
                task.start();
                task
            })
            .collect();
        assert!(waiters.iter().all(|w| !w.is_ready()));

        trigger.notify();

        for waiter in waiters {
            assert_eq!(waiter.wait(), 1);
        }
    }

    #[test]
    fn when_ready_ignores_a_panicked_body() {
        let shared: SharedTask<()> = SharedTask::new(async {
            panic!("step failed");
        });
        shared.start();
        assert!(shared.is_ready());

        let probe = shared.clone();
        let task = Task::new(async move {
            probe.when_ready().await;
            true
        });
        assert!(sync_wait(task));
    }

    #[test]
    #[should_panic(expected = "step failed")]
    fn awaiting_a_panicked_body_resumes_the_panic() {
        let shared: SharedTask<()> = SharedTask::new(async {
            panic!("step failed");
        });
        shared.start();
        sync_wait(shared);
    }
}
