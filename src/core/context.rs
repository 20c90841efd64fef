//! Per-call ambient state shared across a module graph.
//!
//! The original process-global blackboard is replaced by an explicit,
//! cheaply clonable context object that callers thread through
//! invocations. Entries are keyed by module identifier and merged into a
//! call's keyword arguments at invocation time.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Keyword arguments for a module call.
pub type KwArgs = Map<String, Value>;

/// Keyword keys under which context extras are merged into a call.
pub const ATTACHMENTS_KEY: &str = "attachments";
pub const HISTORY_KEY: &str = "history";

/// Serializable view of the context, carried in RPC request headers so the
/// remote side can reconstruct ambient state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub global_params: HashMap<String, KwArgs>,
}

/// Per-call ambient state: a session identifier plus per-module maps of
/// global parameters, file attachments and chat history.
#[derive(Clone)]
pub struct InvocationContext {
    session_id: Arc<str>,
    global_params: Arc<DashMap<String, KwArgs>>,
    attachments: Arc<DashMap<String, Value>>,
    history: Arc<DashMap<String, Value>>,
    usage: Arc<DashMap<String, Value>>,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self::with_session_id(Uuid::new_v4().simple().to_string())
    }

    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Arc::from(session_id.into().as_str()),
            global_params: Arc::new(DashMap::new()),
            attachments: Arc::new(DashMap::new()),
            history: Arc::new(DashMap::new()),
            usage: Arc::new(DashMap::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Set global parameters merged into every call of the given module.
    pub fn set_global_params(&self, module_id: impl Into<String>, params: KwArgs) {
        self.global_params.insert(module_id.into(), params);
    }

    /// Attach files forwarded to the given module under [`ATTACHMENTS_KEY`].
    pub fn set_attachments(&self, module_id: impl Into<String>, files: Value) {
        self.attachments.insert(module_id.into(), files);
    }

    /// Set chat history forwarded to the given module under [`HISTORY_KEY`].
    pub fn set_history(&self, module_id: impl Into<String>, history: Value) {
        self.history.insert(module_id.into(), history);
    }

    /// Record per-call usage scratch for a module (token counts and the
    /// like); cleared by the invocation pipeline after each call.
    pub fn record_usage(&self, module_id: impl Into<String>, usage: Value) {
        self.usage.insert(module_id.into(), usage);
    }

    pub fn usage(&self, module_id: &str) -> Option<Value> {
        self.usage.get(module_id).map(|v| v.clone())
    }

    pub fn clear_usage(&self, module_id: &str) {
        self.usage.remove(module_id);
    }

    /// Fold this context's entries for `module_id` into the call kwargs.
    /// Explicit kwargs lose to global parameters, matching the original
    /// merge direction.
    pub fn merged_kwargs(&self, module_id: &str, mut kw: KwArgs) -> KwArgs {
        if let Some(params) = self.global_params.get(module_id) {
            for (k, v) in params.iter() {
                kw.insert(k.clone(), v.clone());
            }
        }
        if let Some(files) = self.attachments.get(module_id) {
            kw.insert(ATTACHMENTS_KEY.to_string(), files.clone());
        }
        if let Some(history) = self.history.get(module_id) {
            kw.insert(HISTORY_KEY.to_string(), history.clone());
        }
        kw
    }

    /// Serializable view for the RPC headers.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            session_id: self.session_id.to_string(),
            global_params: self
                .global_params
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}
