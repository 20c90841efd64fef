//! A module served behind a network endpoint.
//!
//! `ServerModule` wraps either an already-known URL or an inner module
//! plus a launcher. Its deploy task starts the external process once and
//! publishes the resulting address through the endpoint locator; its
//! `forward` resolves the endpoint (blocking on cross-process
//! publication) and performs the streaming RPC call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::core::context::{InvocationContext, KwArgs};
use crate::core::errors::{ModError, Result};
use crate::core::sink::StreamSink;
use crate::module::node::{Module, ModuleNode, Payload, Task};
use crate::remote::endpoint::{EndpointLocator, EndpointSlot, DEFAULT_POLL_DELAY};
use crate::remote::invoker::{Extractor, OutputFormatter, RemoteInvoker, StreamOptions};
use crate::remote::launcher::{Launcher, LauncherLifecycle, LauncherStatus};
use crate::remote::store::CoordinationStore;

pub fn is_valid_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Launcher stand-in for modules constructed from a known URL; nothing to
/// start or stop.
struct NoLauncher;

#[async_trait]
impl Launcher for NoLauncher {
    async fn launch(&self) -> Result<String> {
        Err(ModError::launcher("launch", "no launcher configured"))
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        Ok(())
    }

    fn status(&self) -> LauncherStatus {
        LauncherStatus::Running
    }
}

/// A module invoked over the network, deployed by an external launcher or
/// reached at a caller-supplied URL.
pub struct ServerModule {
    node: ModuleNode,
    slot: EndpointSlot,
    store: Option<Arc<dyn CoordinationStore>>,
    poll_delay: Duration,
    lifecycle: Arc<LauncherLifecycle>,
    invoker: RemoteInvoker,
}

impl ServerModule {
    /// Serve `inner` through `launcher`; the address becomes known when
    /// the deploy task runs.
    pub fn new(inner: Arc<dyn Module>, launcher: Arc<dyn Launcher>) -> Self {
        let node = ModuleNode::new();
        node.attach(inner);
        Self {
            node,
            slot: EndpointSlot::new(),
            store: None,
            poll_delay: DEFAULT_POLL_DELAY,
            lifecycle: Arc::new(LauncherLifecycle::new(launcher)),
            invoker: RemoteInvoker::new(),
        }
    }

    /// Point at an already-running server. No deploy action will be
    /// performed.
    pub fn from_url(url: &str) -> Result<Self> {
        if !is_valid_url(url) {
            return Err(ModError::usage(format!("invalid url: {url}")));
        }
        let lifecycle = LauncherLifecycle::already_deployed(Arc::new(NoLauncher));
        Ok(Self {
            node: ModuleNode::new(),
            slot: EndpointSlot::with_url(url),
            store: None,
            poll_delay: DEFAULT_POLL_DELAY,
            lifecycle: Arc::new(lifecycle),
            invoker: RemoteInvoker::new(),
        })
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.node.set_name(name);
        self
    }

    /// Enable streamed output. Conflicts with return-trace and with a
    /// post-formatting step: streamed segments bypass both.
    pub fn with_stream(mut self, stream: StreamOptions) -> Result<Self> {
        if stream.enabled && self.node.return_trace() {
            return Err(ModError::usage("module with stream output has no trace"));
        }
        if stream.enabled && self.invoker.has_formatter() {
            return Err(ModError::usage(
                "stream cannot be enabled when a post-formatting step exists",
            ));
        }
        self.invoker = self.invoker.with_stream(stream);
        Ok(self)
    }

    pub fn with_return_trace(self, on: bool) -> Result<Self> {
        if on && self.invoker.stream_enabled() {
            return Err(ModError::usage("module with stream output has no trace"));
        }
        self.node.set_return_trace(on);
        Ok(self)
    }

    pub fn with_formatter(mut self, formatter: OutputFormatter) -> Result<Self> {
        if self.invoker.stream_enabled() {
            return Err(ModError::usage(
                "stream cannot be enabled when a post-formatting step exists",
            ));
        }
        self.invoker = self.invoker.with_formatter(formatter);
        Ok(self)
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.invoker = self.invoker.with_extractor(extractor);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.invoker = self.invoker.with_sink(sink);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    fn locator(&self) -> EndpointLocator {
        EndpointLocator::new(
            self.node.id().clone(),
            self.slot.clone(),
            self.store.clone(),
        )
        .with_poll_delay(self.poll_delay)
    }

    pub fn status(&self) -> LauncherStatus {
        self.lifecycle.status()
    }

    /// Block until the serving process exits.
    pub async fn wait(&self) -> Result<()> {
        self.lifecycle.wait().await
    }
}

#[async_trait]
impl Module for ServerModule {
    fn node(&self) -> &ModuleNode {
        &self.node
    }

    fn kind(&self) -> &'static str {
        "ServerModule"
    }

    fn deploy_tasks(&self) -> Vec<Task> {
        let lifecycle = self.lifecycle.clone();
        let locator = self.locator();
        let label = format!("deploy:{}", self.node.id());
        vec![Task::new(label, move || {
            Box::pin(async move {
                if let Some(url) = lifecycle.ensure_deployed().await? {
                    info!(url, "server deployed");
                    locator.set(&url).await?;
                }
                Ok(())
            })
        })]
    }

    async fn forward(&self, payload: Payload, kw: KwArgs, ctx: &InvocationContext) -> Result<Value> {
        let url = self.locator().get().await?.ok_or_else(|| {
            ModError::usage(format!(
                "module {} has no endpoint; deploy it first",
                self.node.id()
            ))
        })?;
        self.invoker.invoke(&url, payload, kw, ctx).await
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop().await?;
        for m in self.submodules() {
            m.stop().await?;
        }
        Ok(())
    }
}
