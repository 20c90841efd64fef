//! Launcher lifecycle: idempotent start/stop of the external process
//! serving a module.
//!
//! The launcher itself is an external collaborator; this core only
//! guards it with a resettable run-once flag so repeated deploy requests
//! start the process at most once per generation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::errors::Result;

/// Current state of an external launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherStatus {
    Idle,
    Running,
    Stopped,
    Failed,
}

/// Process/job lifecycle primitive the core depends on but does not
/// implement: starts the server process and reports where it listens.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start the external process; returns the URL it serves on.
    async fn launch(&self) -> Result<String>;

    /// Release the external process/resource.
    async fn cleanup(&self) -> Result<()>;

    /// Block until the external process exits.
    async fn wait(&self) -> Result<()>;

    fn status(&self) -> LauncherStatus;
}

/// Run-once wrapper around a [`Launcher`].
///
/// `ensure_deployed` performs the launch exactly once per generation no
/// matter how many times it is called; the guard is held across the
/// launch itself, so concurrent callers serialize on it and only observe
/// `None` once a launch has actually succeeded. `stop` releases the
/// process and resets the guard so a later call redeploys. Dropping the
/// lifecycle triggers cleanup as a safety net.
pub struct LauncherLifecycle {
    launcher: Arc<dyn Launcher>,
    deployed: Mutex<bool>,
}

impl LauncherLifecycle {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            deployed: Mutex::new(false),
        }
    }

    /// Lifecycle whose deploy action is already done, e.g. when the
    /// served URL was supplied up front and no process needs starting.
    pub fn already_deployed(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            deployed: Mutex::new(true),
        }
    }

    pub fn launcher(&self) -> &Arc<dyn Launcher> {
        &self.launcher
    }

    /// Whether a launch has completed for the current generation. A
    /// launch still in flight reads as not deployed.
    pub fn is_deployed(&self) -> bool {
        self.deployed.try_lock().map(|g| *g).unwrap_or(false)
    }

    /// Launch at most once per generation. Returns `Some(url)` when this
    /// call performed the launch, `None` when it was already done. A
    /// failed launch leaves the guard unset so the deploy can be retried.
    pub async fn ensure_deployed(&self) -> Result<Option<String>> {
        let mut deployed = self.deployed.lock().await;
        if *deployed {
            return Ok(None);
        }
        let url = self.launcher.launch().await?;
        *deployed = true;
        debug!(url, "launcher started");
        Ok(Some(url))
    }

    /// Release the external process and reset the run-once guard.
    pub async fn stop(&self) -> Result<()> {
        let mut deployed = self.deployed.lock().await;
        self.launcher.cleanup().await?;
        *deployed = false;
        Ok(())
    }

    pub async fn wait(&self) -> Result<()> {
        self.launcher.wait().await
    }

    pub fn status(&self) -> LauncherStatus {
        self.launcher.status()
    }
}

impl Drop for LauncherLifecycle {
    fn drop(&mut self) {
        // A held guard means a launch is mid-flight; nothing to clean yet.
        let Ok(deployed) = self.deployed.try_lock() else {
            return;
        };
        if !*deployed {
            return;
        }
        // Safety net only; explicit stop() is the supported path.
        let launcher = self.launcher.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = launcher.cleanup().await {
                        warn!(error = %e, "launcher cleanup on drop failed");
                    }
                });
            }
            Err(_) => warn!("lifecycle dropped outside a runtime; launcher not cleaned up"),
        }
    }
}
