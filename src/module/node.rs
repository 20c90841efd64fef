//! Module graph nodes and the `Module` trait.
//!
//! A module is one composable computation unit, local or remote. Every
//! implementation embeds a [`ModuleNode`] holding the shared per-module
//! state: the process-unique identifier, the attached children (the
//! parent exclusively owns them), registered hooks, tunables and the
//! evaluation slots. The provided [`Module::call`] method wraps `forward`
//! with the hook pipeline, ambient-context merge and error wrapping.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::core::context::{InvocationContext, KwArgs};
use crate::core::errors::{ModError, Result};
use crate::core::sink::StreamSink;
use crate::module::hooks::{Hook, HookRegistration};
use crate::module::options::Tunable;

/// Worker cap for batch evaluation over an evalset.
pub(crate) const MAX_EVAL_WORKERS: usize = 200;

/// Globally unique module identifier, assigned at creation and stable for
/// the module's lifetime. Doubles as the coordination-store key and the
/// dedup key during graph traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Rebuild an identifier from its string form (e.g. when a remote
    /// worker reconstructs a module it only knows by id).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Positional-argument bundle for a module call.
///
/// Tagged so the remote side can tell one structured argument from
/// several positional ones without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    None,
    One(Value),
    Many(Vec<Value>),
}

impl Payload {
    /// Package positional arguments: more than one element becomes the
    /// tagged tuple form.
    pub fn from_args(mut args: Vec<Value>) -> Self {
        match args.len() {
            0 => Self::None,
            1 => Self::One(args.remove(0)),
            _ => Self::Many(args),
        }
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Self::One(v)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::One(Value::String(s.to_string()))
    }
}

/// Render a value the way a user would expect to read it: strings bare,
/// everything else as JSON.
pub fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

type TaskFuture = BoxFuture<'static, Result<()>>;

/// An opaque, phase-tagged unit of work produced by a module. One-shot;
/// the scheduler decides when and with what concurrency it runs.
pub struct Task {
    label: String,
    f: Box<dyn FnOnce() -> TaskFuture + Send>,
}

impl Task {
    pub fn new(
        label: impl Into<String>,
        f: impl FnOnce() -> TaskFuture + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            f: Box::new(f),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn run(self) -> Result<()> {
        debug!(task = %self.label, "running task");
        (self.f)().await
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish()
    }
}

pub type EvalCollector = Box<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

/// Shared per-module state embedded by every `Module` implementation.
pub struct ModuleNode {
    id: ModuleId,
    name: RwLock<Option<String>>,
    children: RwLock<Vec<Arc<dyn Module>>>,
    hooks: RwLock<Vec<HookRegistration>>,
    options: RwLock<Vec<Tunable>>,
    evalset: RwLock<Option<Vec<Value>>>,
    eval_collector: Mutex<Option<EvalCollector>>,
    eval_result: RwLock<Option<Value>>,
    used_by: RwLock<Option<ModuleId>>,
    return_trace: AtomicBool,
    trace_sink: RwLock<Option<Arc<dyn StreamSink>>>,
}

impl ModuleNode {
    pub fn new() -> Self {
        Self {
            id: ModuleId::new(),
            name: RwLock::new(None),
            children: RwLock::new(Vec::new()),
            hooks: RwLock::new(Vec::new()),
            options: RwLock::new(Vec::new()),
            evalset: RwLock::new(None),
            eval_collector: Mutex::new(None),
            eval_result: RwLock::new(None),
            used_by: RwLock::new(None),
            return_trace: AtomicBool::new(false),
            trace_sink: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap() = Some(name.into());
    }

    /// Attach a child module. The child list only grows; the parent owns
    /// children attached here.
    pub fn attach(&self, child: Arc<dyn Module>) {
        self.children.write().unwrap().push(child);
    }

    pub fn children(&self) -> Vec<Arc<dyn Module>> {
        self.children.read().unwrap().clone()
    }

    pub fn register_hook(&self, hook: impl Into<HookRegistration>) {
        self.hooks.write().unwrap().push(hook.into());
    }

    /// Remove a previously registered hook instance (matched by identity).
    pub fn unregister_hook(&self, hook: &Arc<dyn Hook>) {
        self.hooks.write().unwrap().retain(|reg| match reg {
            HookRegistration::Instance(h) => !Arc::ptr_eq(h, hook),
            HookRegistration::Factory(_) => true,
        });
    }

    pub fn clear_hooks(&self) {
        self.hooks.write().unwrap().clear();
    }

    /// Resolve registrations into callable hooks for one invocation.
    pub fn materialize_hooks(&self) -> Vec<Arc<dyn Hook>> {
        self.hooks
            .read()
            .unwrap()
            .iter()
            .map(|reg| reg.materialize(self))
            .collect()
    }

    pub fn add_option(&self, option: Tunable) {
        self.options.write().unwrap().push(option);
    }

    pub fn local_options(&self) -> Vec<Tunable> {
        self.options.read().unwrap().clone()
    }

    pub fn set_evalset(&self, items: Vec<Value>) {
        *self.evalset.write().unwrap() = Some(items);
    }

    pub fn evalset(&self) -> Option<Vec<Value>> {
        self.evalset.read().unwrap().clone()
    }

    /// Install the function that folds raw batch results into the stored
    /// eval result. Defaults to collecting into a JSON array.
    pub fn set_eval_collector(&self, f: EvalCollector) {
        *self.eval_collector.lock().unwrap() = Some(f);
    }

    pub fn collect_eval(&self, results: Vec<Value>) -> Value {
        match self.eval_collector.lock().unwrap().as_ref() {
            Some(f) => f(results),
            None => Value::Array(results),
        }
    }

    pub fn set_eval_result(&self, result: Value) {
        *self.eval_result.write().unwrap() = Some(result);
    }

    pub fn eval_result(&self) -> Option<Value> {
        self.eval_result.read().unwrap().clone()
    }

    /// Mark this module as referenced (not owned) by another module.
    pub fn set_used_by(&self, id: ModuleId) {
        *self.used_by.write().unwrap() = Some(id);
    }

    pub fn used_by(&self) -> Option<ModuleId> {
        self.used_by.read().unwrap().clone()
    }

    pub fn set_return_trace(&self, on: bool) {
        self.return_trace.store(on, Ordering::Relaxed);
    }

    pub fn return_trace(&self) -> bool {
        self.return_trace.load(Ordering::Relaxed)
    }

    pub fn set_trace_sink(&self, sink: Arc<dyn StreamSink>) {
        *self.trace_sink.write().unwrap() = Some(sink);
    }

    fn emit_trace(&self, result: &Value) {
        if let Some(sink) = self.trace_sink.read().unwrap().as_ref() {
            sink.emit(&value_text(result));
        }
    }
}

impl Default for ModuleNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the source chain of an error as trace text.
fn error_chain_text(err: &ModError) -> String {
    use std::error::Error;
    let mut out = String::new();
    let mut cur: Option<&(dyn Error + 'static)> = err.source();
    while let Some(e) = cur {
        out.push_str("caused by: ");
        out.push_str(&e.to_string());
        out.push('\n');
        cur = e.source();
    }
    if out.is_empty() {
        "<no further trace>".to_string()
    } else {
        out
    }
}

/// A node in the module graph: one composable computation unit.
///
/// Implementations provide `forward` and may override the per-phase task
/// producers; everything else has graph-generic defaults.
#[async_trait]
pub trait Module: Send + Sync {
    /// The shared state node embedded by this module.
    fn node(&self) -> &ModuleNode;

    /// Label used when wrapping invocation failures.
    fn kind(&self) -> &'static str {
        "Module"
    }

    /// The module's own computation. `kw` arrives with the ambient
    /// context already merged in when invoked through [`Module::call`].
    async fn forward(&self, payload: Payload, kw: KwArgs, ctx: &InvocationContext)
        -> Result<Value>;

    /// Child modules visited during graph traversal. Defaults to the
    /// attached children; composite modules may derive this differently.
    fn submodules(&self) -> Vec<Arc<dyn Module>> {
        self.node().children()
    }

    fn train_tasks(&self) -> Vec<Task> {
        Vec::new()
    }

    fn deploy_tasks(&self) -> Vec<Task> {
        Vec::new()
    }

    /// Tasks for the eval phase. The default performs bounded-concurrency
    /// batch inference over the attached evalset and stores the collected
    /// result in the node's eval slot.
    fn eval_tasks(&self, this: Arc<dyn Module>) -> Vec<Task> {
        default_eval_tasks(this)
    }

    fn post_process_tasks(&self) -> Vec<Task> {
        Vec::new()
    }

    /// Tunables reachable from this module and its children. Read-only
    /// aggregation, no ownership transfer.
    fn options(&self) -> Vec<Tunable> {
        let mut opts = self.node().local_options();
        for m in self.submodules() {
            opts.extend(m.options());
        }
        opts
    }

    /// Visit every submodule recursively, applying `action` where
    /// `filter` matches.
    fn for_each(
        &self,
        filter: &dyn Fn(&Arc<dyn Module>) -> bool,
        action: &mut dyn FnMut(&Arc<dyn Module>),
    ) {
        for sub in self.submodules() {
            if filter(&sub) {
                action(&sub);
            }
            sub.for_each(filter, action);
        }
    }

    /// Stop this module; cascades to children.
    async fn stop(&self) -> Result<()> {
        for m in self.submodules() {
            m.stop().await?;
        }
        Ok(())
    }

    /// Invoke the module through the full pipeline: hook `pre` in
    /// iteration order, ambient-context merge, `forward`, then on success
    /// hook `post` in reverse order and `report` in forward order. A
    /// failure is wrapped with the module's identity and arguments and
    /// skips `post`/`report`.
    async fn call(&self, payload: Payload, kw: KwArgs, ctx: &InvocationContext) -> Result<Value> {
        let node = self.node();
        let hooks = node.materialize_hooks();
        for hook in &hooks {
            hook.pre(&payload, &kw);
        }

        let kw = ctx.merged_kwargs(node.id().as_str(), kw);
        let result = self.forward(payload.clone(), kw.clone(), ctx).await;

        let value = match result {
            Ok(v) => v,
            Err(e) => {
                return Err(ModError::Invocation {
                    kind: self.kind().to_string(),
                    name: node.name(),
                    args: serde_json::to_string(&payload)
                        .unwrap_or_else(|_| format!("{payload:?}")),
                    kwargs: serde_json::to_string(&kw).unwrap_or_else(|_| format!("{kw:?}")),
                    message: e.to_string(),
                    trace: error_chain_text(&e),
                });
            }
        };

        if node.return_trace() {
            node.emit_trace(&value);
        }
        for hook in hooks.iter().rev() {
            hook.post(&value);
        }
        for hook in &hooks {
            hook.report();
        }
        ctx.clear_usage(node.id().as_str());
        Ok(value)
    }
}

impl std::fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("kind", &self.kind())
            .field("name", &self.node().name())
            .finish_non_exhaustive()
    }
}

fn default_eval_tasks(this: Arc<dyn Module>) -> Vec<Task> {
    let Some(items) = this.node().evalset() else {
        return Vec::new();
    };
    let label = format!("eval:{}", this.node().id());
    vec![Task::new(label, move || {
        Box::pin(async move {
            let ctx = InvocationContext::new();
            let calls = items.into_iter().map(|item| {
                let this = this.clone();
                let ctx = ctx.clone();
                async move {
                    match item {
                        Value::Object(map) => this.call(Payload::None, map, &ctx).await,
                        other => this.call(Payload::One(other), KwArgs::new(), &ctx).await,
                    }
                }
            });
            // `buffered` keeps results in evalset order while bounding the
            // number of in-flight calls.
            let results: Vec<Value> = futures::stream::iter(calls)
                .buffered(MAX_EVAL_WORKERS)
                .try_collect()
                .await?;
            let collected = this.node().collect_eval(results);
            this.node().set_eval_result(collected);
            Ok(())
        })
    })]
}
