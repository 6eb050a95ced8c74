use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

/// A fan-in primitive that resumes a single continuation when notified.
///
/// Object-safe so tasks can carry an `Arc<dyn Trigger>` to notify on
/// completion (see [`Task::with_trigger`](crate::Task::with_trigger)).
pub trait Trigger: Send + Sync {
    /// Records one notification.
    fn notify(&self);
}

/// Arms the single-use awaitable for a trigger.
///
/// Returns `true` if the continuation suspended, `false` if the trigger had
/// already tripped and the caller proceeds inline.
trait Arm {
    fn try_wait(&self, waker: &Waker) -> bool;
}

/// Counting trigger: armed with `amount`, resumes its continuation once
/// every notification has landed.
///
/// Both the notifiers and the awaiter decrement the shared counter, so with
/// `amount` notifiers exactly one party observes the counter at zero and
/// resumes the continuation. If every notification lands before the await,
/// the awaiter proceeds inline without suspending.
///
/// The decrement is `AcqRel`: the notifier's release pairs with the
/// resumer's acquire, so writes made before `notify()` are visible to the
/// resumed continuation.
pub struct CounterTrigger {
    remaining: AtomicIsize,
    continuation: Mutex<Option<Waker>>,
}

impl CounterTrigger {
    /// Creates a trigger expecting `amount` notifications.
    pub fn new(amount: usize) -> Self {
        Self {
            remaining: AtomicIsize::new(amount as isize),
            continuation: Mutex::new(None),
        }
    }

    /// Returns the single-use awaitable for this trigger.
    ///
    /// At most one continuation may await a trigger.
    pub fn wait(&self) -> TriggerWait<'_, Self> {
        TriggerWait {
            trigger: self,
            armed: false,
        }
    }

    fn resume(&self) {
        // Woken outside the lock: the continuation runs inline.
        let continuation = self.continuation.lock().take();
        if let Some(waker) = continuation {
            waker.wake();
        }
    }
}

impl Trigger for CounterTrigger {
    fn notify(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 0 {
            self.resume();
        }
    }
}

impl Arm for CounterTrigger {
    fn try_wait(&self, waker: &Waker) -> bool {
        // The waker is stored before the decrement so the notifier that
        // observes zero always finds it.
        *self.continuation.lock() = Some(waker.clone());
        self.remaining.fetch_sub(1, Ordering::AcqRel) != 0
    }
}

/// One-shot trigger: a single notification resumes the continuation.
///
/// Same second-party-resumes protocol as [`CounterTrigger`], with a swap on
/// an atomic flag instead of a counter.
pub struct FlagTrigger {
    set: AtomicBool,
    continuation: Mutex<Option<Waker>>,
}

impl FlagTrigger {
    pub fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
            continuation: Mutex::new(None),
        }
    }

    /// Returns the single-use awaitable for this trigger.
    pub fn wait(&self) -> TriggerWait<'_, Self> {
        TriggerWait {
            trigger: self,
            armed: false,
        }
    }

    fn resume(&self) {
        // Woken outside the lock: the continuation runs inline.
        let continuation = self.continuation.lock().take();
        if let Some(waker) = continuation {
            waker.wake();
        }
    }
}

impl Default for FlagTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl Trigger for FlagTrigger {
    fn notify(&self) {
        // A true flag means the awaiter armed first and is suspended.
        if self.set.swap(true, Ordering::AcqRel) {
            self.resume();
        }
    }
}

impl Arm for FlagTrigger {
    fn try_wait(&self, waker: &Waker) -> bool {
        *self.continuation.lock() = Some(waker.clone());
        !self.set.swap(true, Ordering::AcqRel)
    }
}

/// Awaitable returned by [`CounterTrigger::wait`] and [`FlagTrigger::wait`].
pub struct TriggerWait<'a, T> {
    trigger: &'a T,
    armed: bool,
}

impl<T: Arm> Future for TriggerWait<'_, T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.armed {
            // A poll after arming only happens through the trigger's wake.
            return Poll::Ready(());
        }
        self.armed = true;
        if self.trigger.try_wait(cx.waker()) {
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::task::{RawWaker, RawWakerVTable};

    fn counting_waker(count: Arc<AtomicUsize>) -> Waker {
        struct CountingWake(Arc<AtomicUsize>);
        impl std::task::Wake for CountingWake {
            fn wake(self: Arc<Self>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        Waker::from(Arc::new(CountingWake(count)))
    }

    fn noop_waker() -> Waker {
        fn noop(_: *const ()) {}
        fn clone(p: *const ()) -> RawWaker {
            RawWaker::new(p, &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    #[test]
    fn counter_notified_before_await_proceeds_inline() {
        let trigger = CounterTrigger::new(2);
        trigger.notify();
        trigger.notify();

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut wait = trigger.wait();
        assert_eq!(Pin::new(&mut wait).poll(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn counter_last_notification_wakes_the_awaiter() {
        let trigger = CounterTrigger::new(2);
        let wakes = Arc::new(AtomicUsize::new(0));
        let waker = counting_waker(wakes.clone());
        let mut cx = Context::from_waker(&waker);

        let mut wait = trigger.wait();
        assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());

        trigger.notify();
        assert_eq!(wakes.load(Ordering::SeqCst), 0);

        trigger.notify();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        assert_eq!(Pin::new(&mut wait).poll(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn flag_notified_before_await_proceeds_inline() {
        let trigger = FlagTrigger::new();
        trigger.notify();

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut wait = trigger.wait();
        assert_eq!(Pin::new(&mut wait).poll(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn flag_notification_wakes_the_awaiter() {
        let trigger = FlagTrigger::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        let waker = counting_waker(wakes.clone());
        let mut cx = Context::from_waker(&waker);

        let mut wait = trigger.wait();
        assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());

        trigger.notify();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(Pin::new(&mut wait).poll(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn counter_notifications_from_other_threads() {
        let trigger = Arc::new(CounterTrigger::new(3));
        let done = Arc::new(AtomicUsize::new(0));

        let d = done.clone();
        let t = trigger.clone();
        let task = crate::Task::new(async move {
            t.wait().await;
            d.fetch_add(1, Ordering::SeqCst);
        });
        task.start();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let trigger = trigger.clone();
                std::thread::spawn(move || trigger.notify())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        task.wait();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
