//! Phase scheduling: run collected task lists with phase-appropriate
//! concurrency.
//!
//! Train tasks run as a synchronized parallel batch. Deploy tasks run
//! fire-and-forget when a coordination store is available (readiness is
//! then observable by polling published endpoints) and strictly
//! sequentially otherwise, since without the store there is no other way
//! to know a deployment finished. Eval and post-process are sequential.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::core::errors::{ModError, Result};
use crate::module::node::{Module, Task};
use crate::phases::collector::{collect_tasks, PhaseTasks};
use crate::phases::phase::Phase;
use crate::remote::store::CoordinationStore;

/// Failure channel for the fire-and-forget deploy path. Async deploys
/// have no completion signal other than endpoint polling; errors from
/// that path land here instead of being dropped.
pub struct DeployWatch {
    rx: mpsc::UnboundedReceiver<ModError>,
}

impl DeployWatch {
    /// A failure already reported, if any. Non-blocking.
    pub fn try_failure(&mut self) -> Option<ModError> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next failure. `None` once every async deploy task has
    /// finished without further errors.
    pub async fn next_failure(&mut self) -> Option<ModError> {
        self.rx.recv().await
    }
}

/// Executes collected phase tasks and drives whole-graph lifecycle
/// updates. Holds the optional coordination store that decides the deploy
/// concurrency policy.
pub struct PhaseRunner {
    store: Option<Arc<dyn CoordinationStore>>,
    deploy_watch: Mutex<Option<DeployWatch>>,
}

impl PhaseRunner {
    pub fn new() -> Self {
        Self {
            store: None,
            deploy_watch: Mutex::new(None),
        }
    }

    pub fn with_store(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store: Some(store),
            deploy_watch: Mutex::new(None),
        }
    }

    pub fn store(&self) -> Option<Arc<dyn CoordinationStore>> {
        self.store.clone()
    }

    /// Take the failure channel left behind by the most recent
    /// asynchronous deploy batch.
    pub fn take_deploy_watch(&self) -> Option<DeployWatch> {
        self.deploy_watch.lock().unwrap().take()
    }

    /// Bring the graph through train, deploy and eval.
    pub async fn update(&self, root: &Arc<dyn Module>) -> Result<Arc<dyn Module>> {
        self.update_with(root, &Phase::REQUESTABLE, true).await
    }

    /// Deploy only.
    pub async fn start(&self, root: &Arc<dyn Module>) -> Result<Arc<dyn Module>> {
        self.update_with(root, &[Phase::Deploy], true).await
    }

    /// Eval only.
    pub async fn evaluate(&self, root: &Arc<dyn Module>) -> Result<Arc<dyn Module>> {
        self.update_with(root, &[Phase::Eval], true).await
    }

    /// Collect tasks for the requested phases and run them with the
    /// per-phase concurrency policy. Returns the root for chaining.
    pub async fn update_with(
        &self,
        root: &Arc<dyn Module>,
        phases: &[Phase],
        recursive: bool,
    ) -> Result<Arc<dyn Module>> {
        let tasks = collect_tasks(root, phases, recursive);
        self.run(tasks, phases).await?;
        Ok(root.clone())
    }

    /// Run an already-collected task set.
    pub async fn run(&self, tasks: PhaseTasks, phases: &[Phase]) -> Result<()> {
        if phases.contains(&Phase::Train) && !tasks.train.is_empty() {
            run_parallel_sync(tasks.train).await?;
        }
        if phases.contains(&Phase::Deploy) && !tasks.deploy.is_empty() {
            if self.store.is_some() {
                let watch = spawn_parallel_async(tasks.deploy);
                *self.deploy_watch.lock().unwrap() = Some(watch);
            } else {
                run_sequential(tasks.deploy).await?;
            }
        }
        if phases.contains(&Phase::Eval) && !tasks.eval.is_empty() {
            run_sequential(tasks.eval).await?;
        }
        if !tasks.post_process.is_empty() {
            run_sequential(tasks.post_process).await?;
        }
        Ok(())
    }
}

impl Default for PhaseRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronized parallel batch: all tasks start together, the caller
/// blocks until all complete, and the first failure aborts the rest.
async fn run_parallel_sync(tasks: Vec<Task>) -> Result<()> {
    info!(count = tasks.len(), "running synchronized parallel batch");
    let mut set = JoinSet::new();
    for task in tasks {
        set.spawn(task.run());
    }
    while let Some(joined) = set.join_next().await {
        let outcome = joined
            .map_err(|e| ModError::internal(format!("batch task panicked: {e}")))?;
        if let Err(e) = outcome {
            set.abort_all();
            return Err(e);
        }
    }
    Ok(())
}

/// Fire-and-forget parallel batch: the caller does not block; failures
/// are logged and forwarded to the returned [`DeployWatch`].
fn spawn_parallel_async(tasks: Vec<Task>) -> DeployWatch {
    info!(count = tasks.len(), "launching asynchronous deploy batch");
    let (tx, rx) = mpsc::unbounded_channel();
    for task in tasks {
        let tx = tx.clone();
        let label = task.label().to_string();
        tokio::spawn(async move {
            if let Err(e) = task.run().await {
                error!(task = %label, error = %e, "async deploy task failed");
                let _ = tx.send(e);
            }
        });
    }
    DeployWatch { rx }
}

/// Strictly sequential execution, each task fully completing before the
/// next starts.
async fn run_sequential(tasks: Vec<Task>) -> Result<()> {
    for task in tasks {
        task.run().await?;
    }
    Ok(())
}
