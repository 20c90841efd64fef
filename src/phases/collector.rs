//! Phase task collection: one deduplicated walk over the module graph.
//!
//! Iterative depth-first traversal with an explicit stack, so deep or
//! irregular graphs cannot overflow the call stack. A module is finalized
//! (its tasks collected) only after all its children, and exactly once:
//! the visited set keyed by module identifier makes diamonds terminate
//! with a single finalization, and the in-progress set breaks
//! back-reference cycles.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::module::node::{Module, ModuleId, Task};
use crate::phases::phase::Phase;

/// One flattened task list per phase. Empty producer results simply add
/// nothing.
#[derive(Debug, Default)]
pub struct PhaseTasks {
    pub train: Vec<Task>,
    pub deploy: Vec<Task>,
    pub eval: Vec<Task>,
    pub post_process: Vec<Task>,
}

impl PhaseTasks {
    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
            && self.deploy.is_empty()
            && self.eval.is_empty()
            && self.post_process.is_empty()
    }
}

/// Walk the graph rooted at `root` and gather per-phase task lists.
///
/// Post-order: a module's tasks are collected strictly after all its
/// children's. Post-process tasks are always gathered regardless of
/// `phases`. With `recursive` false only the root itself is collected.
pub fn collect_tasks(root: &Arc<dyn Module>, phases: &[Phase], recursive: bool) -> PhaseTasks {
    let mut tasks = PhaseTasks::default();
    let mut visited: HashSet<ModuleId> = HashSet::new();
    let mut in_progress: HashSet<ModuleId> = HashSet::new();

    // (module, children snapshot, next child index)
    let mut stack: Vec<(Arc<dyn Module>, Vec<Arc<dyn Module>>, usize)> = Vec::new();
    let root_children = if recursive {
        root.submodules()
    } else {
        Vec::new()
    };
    in_progress.insert(root.node().id().clone());
    stack.push((root.clone(), root_children, 0));

    while let Some(top) = stack.last_mut() {
        if top.2 < top.1.len() {
            let child = top.1[top.2].clone();
            top.2 += 1;
            let id = child.node().id().clone();
            // Skip already-finalized modules (diamonds) and modules still
            // on the stack (back-reference cycles).
            if visited.contains(&id) || in_progress.contains(&id) {
                continue;
            }
            let children = child.submodules();
            in_progress.insert(id);
            stack.push((child, children, 0));
        } else {
            let (module, _, _) = stack.pop().unwrap();
            let id = module.node().id().clone();
            in_progress.remove(&id);
            if !visited.insert(id) {
                continue;
            }
            finalize(&module, phases, &mut tasks);
        }
    }

    debug!(
        train = tasks.train.len(),
        deploy = tasks.deploy.len(),
        eval = tasks.eval.len(),
        post_process = tasks.post_process.len(),
        "collected phase tasks"
    );
    tasks
}

fn finalize(module: &Arc<dyn Module>, phases: &[Phase], tasks: &mut PhaseTasks) {
    if phases.contains(&Phase::Train) {
        tasks.train.extend(module.train_tasks());
    }
    if phases.contains(&Phase::Deploy) {
        tasks.deploy.extend(module.deploy_tasks());
    }
    if phases.contains(&Phase::Eval) {
        tasks.eval.extend(module.eval_tasks(module.clone()));
    }
    tasks.post_process.extend(module.post_process_tasks());
}
