use std::future::Future;
use std::panic;
use std::sync::Arc;

use crate::task::Task;
use crate::trigger::{CounterTrigger, FlagTrigger};

/// Joins a collection of awaitables into a single task.
///
/// The returned task completes after **all** inputs have completed, in
/// whatever order they finish. Each input is wrapped in a small trigger
/// task that notifies a shared [`CounterTrigger`] on completion, so a
/// failed input still releases the barrier; the first captured panic is
/// then re-raised through the returned task.
///
/// Zero inputs complete immediately; a single input is awaited directly;
/// two inputs go through the cheaper [`when_both`] path.
///
/// # Example
///
/// ```
/// use amaranth_core::{sync_wait, when_all, Task};
///
/// let tasks: Vec<Task<u32>> = (0..3).map(|i| Task::new(async move { i })).collect();
///
/// sync_wait(when_all(tasks));
/// ```
pub fn when_all<I>(awaitables: I) -> Task<()>
where
    I: IntoIterator,
    I::Item: Future + Send + 'static,
    <I::Item as Future>::Output: Send + 'static,
{
    let mut awaitables: Vec<_> = awaitables.into_iter().collect();
    match awaitables.len() {
        0 => Task::new(async {}),
        1 => {
            let only = awaitables.pop().unwrap();
            Task::new(async move {
                let _ = only.await;
            })
        }
        2 => {
            let second = awaitables.pop().unwrap();
            let first = awaitables.pop().unwrap();
            when_both(first, second)
        }
        amount => Task::new(async move {
            let counter = Arc::new(CounterTrigger::new(amount));

            // The trigger tasks are kept alive until the counter fires.
            let triggers: Vec<Task<()>> = awaitables
                .into_iter()
                .map(|awaitable| {
                    let task = Task::with_trigger(
                        async move {
                            let _ = awaitable.await;
                        },
                        counter.clone(),
                    );
                    task.start();
                    task
                })
                .collect();

            counter.wait().await;

            for task in &triggers {
                if let Some(payload) = task.take_panic() {
                    panic::resume_unwind(payload);
                }
            }
        }),
    }
}

/// Joins two awaitables of possibly different types.
///
/// Only the first input pays for a trigger task; the second is awaited on
/// the joining task's own frame, then a one-shot [`FlagTrigger`] closes the
/// gap.
pub fn when_both<A, B>(first: A, second: B) -> Task<()>
where
    A: Future + Send + 'static,
    A::Output: Send + 'static,
    B: Future + Send + 'static,
    B::Output: Send + 'static,
{
    Task::new(async move {
        let flag = Arc::new(FlagTrigger::new());

        let trigger = Task::with_trigger(
            async move {
                let _ = first.await;
            },
            flag.clone(),
        );
        trigger.start();

        let _ = second.await;
        flag.wait().await;

        if let Some(payload) = trigger.take_panic() {
            panic::resume_unwind(payload);
        }
    })
}
