use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use amaranth_core::{when_all, CounterTrigger, SharedTask, Task};

use crate::context::Context;
use crate::graph::{self, ScheduleError, Step};
use crate::stage::{Stage, StageLabel};
use crate::system::{SystemId, SystemObject};

/// Builds and runs compiled system schedules.
///
/// Systems are registered into stages up front; each tick the consumer
/// announces the stage sequence with [`schedule()`](Scheduler::schedule)
/// calls and then runs it with [`run_all()`](Scheduler::run_all). Compiled
/// step lists are cached per stage sequence, so steady-state ticks pay no
/// compilation cost.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use amaranth_core::{sync_wait, Task};
/// use amaranth_ecs::{AccessList, Context, Scheduler, StageLabel, SystemObject, Writes};
///
/// struct Registry;
/// struct Position;
///
/// struct Simulation;
/// impl StageLabel for Simulation {}
///
/// let mut scheduler = Scheduler::new();
/// scheduler.add_system::<Simulation>(SystemObject::new(
///     |context| {
///         Task::new(async move {
///             context.expect::<Arc<AtomicUsize>>().fetch_add(1, Ordering::SeqCst);
///         })
///     },
///     AccessList::of::<Writes<Registry, Position>>(),
/// ));
///
/// let ran = Arc::new(AtomicUsize::new(0));
/// let mut context = Context::new();
/// context.insert(ran.clone());
/// let context = Arc::new(context);
///
/// scheduler.schedule::<Simulation>();
/// sync_wait(scheduler.run_all(&context).unwrap());
///
/// assert_eq!(ran.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct Scheduler {
    stages: HashMap<TypeId, Stage>,
    cache: Cache,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a system into stage `S`; returns its stage-local id.
    pub fn add_system<S: StageLabel>(&mut self, system: SystemObject) -> SystemId {
        self.stages
            .entry(TypeId::of::<S>())
            .or_default()
            .add_system(system)
    }

    /// Records an intra-stage ordering constraint for stage `S`.
    ///
    /// See [`Stage::add_explicit_order`].
    pub fn add_explicit_order<S: StageLabel>(&mut self, before: SystemId, after: SystemId) {
        self.stages
            .entry(TypeId::of::<S>())
            .or_default()
            .add_explicit_order(before, after);
    }

    /// Returns the stage registered under `S`, if any system or order has
    /// been added to it.
    pub fn stage<S: StageLabel>(&self) -> Option<&Stage> {
        self.stages.get(&TypeId::of::<S>())
    }

    /// Appends stage `S` to the sequence the next
    /// [`run_all()`](Scheduler::run_all) will execute.
    pub fn schedule<S: StageLabel>(&mut self) {
        self.stages.entry(TypeId::of::<S>()).or_default();
        self.cache.descend(TypeId::of::<S>());
    }

    /// Builds the tick task for the scheduled stage sequence.
    ///
    /// Compiles the sequence on first observation and caches the result;
    /// the sequence then resets, so the next tick starts from an empty
    /// sequence. The returned task runs every step of the compiled
    /// schedule, each step awaiting its predecessors through a counter
    /// trigger before running its system.
    ///
    /// An unscheduled (empty) sequence completes immediately. A cycle in
    /// the dependency graph fails here, before anything runs; the error
    /// names the systems involved and the sequence is still reset.
    ///
    /// A panicking system does not cancel the tick: dependants of the
    /// failed step still run, and the first observed failure is re-raised
    /// through the returned task.
    pub fn run_all(&mut self, context: &Arc<Context>) -> Result<Task<()>, ScheduleError> {
        let baked = self.bake();
        self.cache.reset();
        let steps = baked?;
        Ok(run_steps(steps, context.clone()))
    }

    fn bake(&mut self) -> Result<Arc<[Step]>, ScheduleError> {
        if let Some(steps) = self.cache.baked() {
            return Ok(steps);
        }

        let path = self.cache.path();
        let stages: Vec<&Stage> = path
            .iter()
            .map(|id| self.stages.get(id).expect("scheduled stage must exist"))
            .collect();
        let steps: Arc<[Step]> = graph::compile(&stages)?.into();
        log::debug!(
            "baked schedule: {} stages compiled into {} steps",
            stages.len(),
            steps.len()
        );
        self.cache.store(steps.clone());
        Ok(steps)
    }
}

fn run_steps(steps: Arc<[Step]>, context: Arc<Context>) -> Task<()> {
    Task::new(async move {
        let mut tasks: Vec<SharedTask<()>> = Vec::with_capacity(steps.len());
        for index in 0..steps.len() {
            let task = make_step_task(&steps[index], &tasks, &context);
            tasks.push(task);
        }
        // Dependencies precede their dependants, so by the time a step
        // starts, every task it may await is already started.
        for task in &tasks {
            task.start();
        }
        when_all(tasks.iter().cloned()).await;
    })
}

fn make_step_task(
    step: &Step,
    tasks: &[SharedTask<()>],
    context: &Arc<Context>,
) -> SharedTask<()> {
    let predecessors: Vec<SharedTask<()>> = step
        .dependencies
        .iter()
        .map(|&dependency| tasks[dependency].clone())
        .collect();
    let name = step.name;
    let executor = step.executor.clone();
    let context = context.clone();

    SharedTask::new(async move {
        if !predecessors.is_empty() {
            let trigger = Arc::new(CounterTrigger::new(predecessors.len()));

            // One trigger task per predecessor. Awaiting readiness rather
            // than the value releases this step even when a predecessor
            // failed; the failure itself surfaces through the tick's
            // aggregate join.
            let _releases: Vec<Task<()>> = predecessors
                .into_iter()
                .map(|predecessor| {
                    let task = Task::with_trigger(
                        async move {
                            predecessor.when_ready().await;
                        },
                        trigger.clone(),
                    );
                    task.start();
                    task
                })
                .collect();

            trigger.wait().await;
        }

        log::trace!("running system `{name}`");
        executor(context.clone()).await;
    })
}

/// Trie over stage sequences; each node may hold the baked step list for
/// the sequence spelled by its path from the root.
struct Cache {
    nodes: Vec<CacheNode>,
    current: usize,
}

struct CacheNode {
    parent: usize,
    stage: Option<TypeId>,
    children: HashMap<TypeId, usize>,
    steps: Option<Arc<[Step]>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            nodes: vec![CacheNode {
                parent: 0,
                stage: None,
                children: HashMap::new(),
                steps: None,
            }],
            current: 0,
        }
    }
}

impl Cache {
    fn descend(&mut self, stage: TypeId) {
        let current = self.current;
        if let Some(&child) = self.nodes[current].children.get(&stage) {
            self.current = child;
            return;
        }
        let index = self.nodes.len();
        self.nodes.push(CacheNode {
            parent: current,
            stage: Some(stage),
            children: HashMap::new(),
            steps: None,
        });
        self.nodes[current].children.insert(stage, index);
        self.current = index;
    }

    fn baked(&self) -> Option<Arc<[Step]>> {
        self.nodes[self.current].steps.clone()
    }

    fn store(&mut self, steps: Arc<[Step]>) {
        let current = self.current;
        self.nodes[current].steps = Some(steps);
    }

    /// The stage sequence spelled by the path from the root to the
    /// current node.
    fn path(&self) -> Vec<TypeId> {
        let mut path = Vec::new();
        let mut index = self.current;
        while let Some(stage) = self.nodes[index].stage {
            path.push(stage);
            index = self.nodes[index].parent;
        }
        path.reverse();
        path
    }

    fn reset(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessList, Reads, Writes};
    use amaranth_core::sync_wait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Registry;
    struct X;

    struct First;
    impl StageLabel for First {}
    struct Second;
    impl StageLabel for Second {}

    fn counting_system(count: &Arc<AtomicUsize>, access: AccessList) -> SystemObject {
        let count = count.clone();
        SystemObject::new(
            move |_| {
                let count = count.clone();
                Task::new(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            },
            access,
        )
    }

    #[test]
    fn empty_tick_completes_immediately() {
        let mut scheduler = Scheduler::new();
        let context = Arc::new(Context::new());

        let tick = scheduler.run_all(&context).unwrap();
        tick.start();
        assert!(tick.is_ready());
    }

    #[test]
    fn unscheduled_stages_do_not_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.add_system::<First>(counting_system(&count, AccessList::new()));

        let context = Arc::new(Context::new());
        sync_wait(scheduler.run_all(&context).unwrap());

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scheduled_stage_runs_every_system() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        for _ in 0..5 {
            scheduler.add_system::<First>(counting_system(&count, AccessList::new()));
        }

        let context = Arc::new(Context::new());
        scheduler.schedule::<First>();
        sync_wait(scheduler.run_all(&context).unwrap());

        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn sequence_resets_between_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.add_system::<First>(counting_system(&count, AccessList::new()));

        let context = Arc::new(Context::new());
        scheduler.schedule::<First>();
        sync_wait(scheduler.run_all(&context).unwrap());
        // No schedule() before the second tick: nothing runs.
        sync_wait(scheduler.run_all(&context).unwrap());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn identical_sequences_reuse_the_baked_steps() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.add_system::<First>(counting_system(
            &count,
            AccessList::of::<Writes<Registry, X>>(),
        ));
        scheduler.add_system::<Second>(counting_system(
            &count,
            AccessList::of::<Reads<Registry, X>>(),
        ));

        let context = Arc::new(Context::new());

        scheduler.schedule::<First>();
        scheduler.schedule::<Second>();
        let first_baked = scheduler.bake().unwrap();
        sync_wait(scheduler.run_all(&context).unwrap());

        scheduler.schedule::<First>();
        scheduler.schedule::<Second>();
        let second_baked = scheduler.bake().unwrap();
        sync_wait(scheduler.run_all(&context).unwrap());

        assert!(Arc::ptr_eq(&first_baked, &second_baked));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn different_sequences_bake_independently() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.add_system::<First>(counting_system(&count, AccessList::new()));
        scheduler.add_system::<Second>(counting_system(&count, AccessList::new()));

        let context = Arc::new(Context::new());

        scheduler.schedule::<First>();
        sync_wait(scheduler.run_all(&context).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.schedule::<First>();
        scheduler.schedule::<Second>();
        sync_wait(scheduler.run_all(&context).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cycle_fails_before_anything_runs() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        let a = scheduler.add_system::<First>(
            counting_system(&count, AccessList::of::<Writes<Registry, X>>()),
        );
        let b = scheduler.add_system::<First>(
            counting_system(&count, AccessList::of::<Writes<Registry, X>>()),
        );
        scheduler.add_explicit_order::<First>(a, b);
        scheduler.add_explicit_order::<First>(b, a);

        let context = Arc::new(Context::new());
        scheduler.schedule::<First>();
        let error = scheduler.run_all(&context).unwrap_err();
        let ScheduleError::Cycle { involved } = error;
        assert_eq!(involved.len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
