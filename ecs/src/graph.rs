use std::collections::VecDeque;
use std::sync::Arc;

use fixedbitset::FixedBitSet;

use crate::stage::Stage;
use crate::system::SystemFn;

/// Error produced while compiling a stage sequence.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Explicit order edges formed a cycle between conflicting systems.
    ///
    /// Fatal: the stage sequence can never execute. `involved` names the
    /// systems that could not be ordered.
    #[error("dependency cycle detected among systems: {}", .involved.join(", "))]
    Cycle { involved: Vec<String> },
}

/// One node of the compiled execution graph.
///
/// `dependencies` holds indices of earlier steps this step must await;
/// they are strictly smaller than the step's own index and transitively
/// reduced, so every entry is a direct predecessor.
pub(crate) struct Step {
    pub name: &'static str,
    pub executor: Arc<SystemFn>,
    pub dependencies: Vec<usize>,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Compiles an ordered stage sequence into an executable step list.
///
/// Three phases:
/// 1. flatten stages in order, systems in registration order;
/// 2. collect ordering edges — a conflict across a stage boundary orders
///    the earlier stage's system first, a conflict within a stage is
///    ordered only by an explicit order edge;
/// 3. topologically sort (failing on cycles), then emit each system's
///    dependency list from the conflict relation, transitively reduced.
///
/// Quadratic in the total system count; compilation is amortized by the
/// scheduler's cache.
pub(crate) fn compile(stages: &[&Stage]) -> Result<Vec<Step>, ScheduleError> {
    struct Flat<'a> {
        stage: usize,
        local: usize,
        system: &'a crate::system::SystemObject,
    }

    // Phase 1: enumerate.
    let mut flat = Vec::new();
    for (stage_index, stage) in stages.iter().enumerate() {
        for (local, system) in stage.systems().iter().enumerate() {
            flat.push(Flat {
                stage: stage_index,
                local,
                system,
            });
        }
    }
    let amount = flat.len();

    // Phase 2: ordering edges, as dependant lists.
    let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); amount];
    let mut in_degrees = vec![0usize; amount];
    for (index, entry) in flat.iter().enumerate() {
        for (other_index, other) in flat.iter().enumerate() {
            if index == other_index {
                continue;
            }
            let ordered_before = if other.stage < entry.stage {
                true
            } else if other.stage == entry.stage {
                stages[entry.stage].has_explicit_order(other.local, entry.local)
            } else {
                false
            };
            if ordered_before && entry.system.has_dependency(other.system) {
                dependants[other_index].push(index);
                in_degrees[index] += 1;
            }
        }
    }

    // Phase 3a: topological order.
    let order = topological_order(&dependants, &in_degrees).map_err(|unresolved| {
        let involved = unresolved
            .into_iter()
            .map(|index| flat[index].system.name().to_string())
            .collect();
        ScheduleError::Cycle { involved }
    })?;

    // Phase 3b: emit steps with transitively reduced dependencies.
    //
    // Walking candidates nearest-first, an edge is kept only when its head
    // is not already covered by the reachability closure of a kept
    // predecessor. `closures[i]` is the set of steps reachable backwards
    // from step `i` through kept edges.
    let mut steps = Vec::with_capacity(amount);
    let mut closures: Vec<FixedBitSet> = Vec::with_capacity(amount);
    for (position, &node) in order.iter().enumerate() {
        let mut closure = FixedBitSet::with_capacity(amount);
        let mut dependencies = Vec::new();
        for candidate in (0..position).rev() {
            if closure.contains(candidate) {
                continue;
            }
            if flat[node].system.has_dependency(flat[order[candidate]].system) {
                dependencies.push(candidate);
                closure.union_with(&closures[candidate]);
                closure.insert(candidate);
            }
        }
        dependencies.reverse();
        closures.push(closure);
        steps.push(Step {
            name: flat[node].system.name(),
            executor: flat[node].system.executor(),
            dependencies,
        });
    }

    Ok(steps)
}

/// Kahn's algorithm over the dependant lists.
///
/// Returns the node indices in a deterministic topological order, or the
/// indices left unresolved by a cycle.
fn topological_order(
    dependants: &[Vec<usize>],
    in_degrees: &[usize],
) -> Result<Vec<usize>, Vec<usize>> {
    let amount = in_degrees.len();
    let mut remaining = in_degrees.to_vec();
    let mut queue = VecDeque::new();

    for (index, &degree) in remaining.iter().enumerate() {
        if degree == 0 {
            queue.push_back(index);
        }
    }

    let mut order = Vec::with_capacity(amount);
    while let Some(index) = queue.pop_front() {
        order.push(index);
        for &dependant in &dependants[index] {
            remaining[dependant] -= 1;
            if remaining[dependant] == 0 {
                queue.push_back(dependant);
            }
        }
    }

    if order.len() == amount {
        Ok(order)
    } else {
        let unresolved = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree > 0)
            .map(|(index, _)| index)
            .collect();
        Err(unresolved)
    }
}
