use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::trigger::Trigger;

/// Body has not been polled yet.
const CREATED: u8 = 0;
/// A thread is currently driving the body.
const POLLING: u8 = 1;
/// A wake arrived while the body was being driven; the driver re-polls.
const NOTIFIED: u8 = 2;
/// The body returned `Pending` and waits on its awaitable.
const SUSPENDED: u8 = 3;
/// The result is published.
const READY: u8 = 4;

pub(crate) type BodyResult<T> = Result<T, Box<dyn Any + Send>>;

type BoxBody<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A one-shot lazy asynchronous computation.
///
/// A task is created around an async body and does nothing until it is
/// [`start()`](Task::start)ed or awaited. The body then runs on the calling
/// thread up to its first suspension point; every later resumption happens
/// on whatever thread completed the awaitable the body was suspended on
/// (typically a [`ThreadPool`](crate::ThreadPool) worker).
///
/// At most one consumer may await a task. Completion publishes the result
/// with release ordering; [`is_ready()`](Task::is_ready), awaiting and
/// [`wait()`](Task::wait) observe it with acquire ordering, so everything
/// the body wrote is visible to the consumer.
///
/// A panic in the body is captured into the task result and resumed on the
/// consumer's thread when the value is taken.
///
/// # Example
///
/// ```
/// use amaranth_core::{sync_wait, Task};
///
/// let inner = Task::new(async { 10 });
/// let outer = Task::new(async move { inner.await + 5 });
///
/// assert_eq!(sync_wait(outer), 15);
/// ```
pub struct Task<T = ()> {
    raw: Arc<RawTask<T>>,
}

impl<T: Send + 'static> Task<T> {
    /// Creates a task around `body` without running it.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            raw: RawTask::new(Box::pin(body), None),
        }
    }

    /// Creates a task that notifies `trigger` when it completes.
    ///
    /// The notification fires after the result is published, even when the
    /// body panicked. This is the building block of the fan-in combinators:
    /// a failed input still releases the barrier, and the failure is
    /// re-raised by whoever inspects the task afterwards.
    pub fn with_trigger<F>(body: F, trigger: Arc<dyn Trigger>) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            raw: RawTask::new(Box::pin(body), Some(trigger)),
        }
    }

    /// Begins execution on the calling thread.
    ///
    /// Runs the body until its first suspension point or completion.
    /// Calling this more than once has no effect.
    pub fn start(&self) {
        self.raw.start();
    }

    /// Returns whether the result has been published.
    pub fn is_ready(&self) -> bool {
        self.raw.is_ready()
    }

    /// Returns an awaitable that completes when the task does, yielding `()`.
    ///
    /// Unlike awaiting the task itself this neither consumes the value nor
    /// re-raises a captured panic. The task must have been started, by
    /// [`start()`](Task::start) or by an awaiter, for this to ever complete.
    pub fn when_ready(&self) -> WhenReady<'_, T> {
        WhenReady { raw: &self.raw }
    }

    /// Blocks the calling thread until the task completes, then returns the
    /// value.
    ///
    /// Starts the task if it was not started yet. If the body panicked, the
    /// panic is resumed here.
    pub fn wait(self) -> T {
        crate::sync_wait(self)
    }

    pub(crate) fn install_continuation(&self, waker: &Waker) {
        self.raw.set_continuation(waker);
    }

    pub(crate) fn consume(self) -> T {
        match self.raw.take_result() {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Removes and returns the captured panic payload, if the body panicked.
    pub(crate) fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.raw.take_panic()
    }
}

impl<T: Send + 'static> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        // Lazy-task semantics: the first awaiter runs the body inline.
        self.raw.start();
        if self.raw.is_ready() {
            return Poll::Ready(take(&self.raw));
        }
        self.raw.set_continuation(cx.waker());
        // Re-check: completion may have raced the registration, in which
        // case the completer might not have seen our waker.
        if self.raw.is_ready() {
            return Poll::Ready(take(&self.raw));
        }
        Poll::Pending
    }
}

fn take<T: Send + 'static>(raw: &RawTask<T>) -> T {
    match raw.take_result() {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Awaitable returned by [`Task::when_ready`].
pub struct WhenReady<'a, T> {
    raw: &'a Arc<RawTask<T>>,
}

impl<T: Send + 'static> Future for WhenReady<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.raw.is_ready() {
            return Poll::Ready(());
        }
        self.raw.set_continuation(cx.waker());
        if self.raw.is_ready() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

pub(crate) struct RawTask<T> {
    state: AtomicU8,
    body: Mutex<Option<BoxBody<T>>>,
    result: Mutex<Option<BodyResult<T>>>,
    continuation: Mutex<Option<Waker>>,
    trigger: Option<Arc<dyn Trigger>>,
}

impl<T: Send + 'static> RawTask<T> {
    fn new(body: BoxBody<T>, trigger: Option<Arc<dyn Trigger>>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(CREATED),
            body: Mutex::new(Some(body)),
            result: Mutex::new(None),
            continuation: Mutex::new(None),
            trigger,
        })
    }

    fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    fn set_continuation(&self, waker: &Waker) {
        *self.continuation.lock() = Some(waker.clone());
    }

    fn take_result(&self) -> BodyResult<T> {
        self.result
            .lock()
            .take()
            .expect("task result taken before completion or taken twice")
    }

    fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        let mut slot = self.result.lock();
        if matches!(slot.as_ref(), Some(Err(_))) {
            match slot.take() {
                Some(Err(payload)) => Some(payload),
                _ => None,
            }
        } else {
            None
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

    /// Called by wakers when an awaitable the body suspended on completes.
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
                    // The driving thread folds the wake into another poll.
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
                _ => return, // NOTIFIED or READY: nothing to do
            }
        }
    }

    /// Runs the body until it suspends or completes. The caller must have
    /// claimed the `POLLING` state.
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
                    self.complete(Ok(value));
                    return;
                }
                Err(payload) => {
                    self.complete(Err(payload));
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
                    // A wake slipped in while polling: poll again.
                    self.state.store(POLLING, Ordering::Release);
                }
            }
        }
    }

    fn complete(&self, result: BodyResult<T>) {
        *self.body.lock() = None;
        *self.result.lock() = Some(result);
        self.state.store(READY, Ordering::Release);
        // The continuation is woken outside the lock: it may resume a
        // whole chain of tasks inline.
        let continuation = self.continuation.lock().take();
        if let Some(waker) = continuation {
            waker.wake();
        }
        if let Some(trigger) = &self.trigger {
            trigger.notify();
        }
    }
}

impl<T: Send + 'static> Wake for RawTask<T> {
    fn wake(self: Arc<Self>) {
        self.resume();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.resume();
    }
}
