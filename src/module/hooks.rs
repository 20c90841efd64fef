//! Invocation instrumentation hooks.
//!
//! Hooks observe a module call but never alter it: `pre` runs before the
//! wrapped computation in iteration order, `post` runs after a successful
//! return in reverse order (stack discipline, so the last hook to see
//! "before" is the first to see "after"), and `report` runs last in
//! forward order. A failed call skips `post` and `report` entirely.

use std::sync::Arc;

use serde_json::Value;

use crate::core::context::KwArgs;
use crate::module::node::{ModuleNode, Payload};

/// Instrumentation callback wrapping a module invocation. All methods are
/// observers; the result is passed by reference and cannot be replaced.
pub trait Hook: Send + Sync {
    fn pre(&self, _payload: &Payload, _kw: &KwArgs) {}
    fn post(&self, _result: &Value) {}
    fn report(&self) {}
}

/// Builds a hook instance bound to the invoking module, once per call.
pub trait HookFactory: Send + Sync {
    fn make(&self, node: &ModuleNode) -> Arc<dyn Hook>;
}

/// A registered hook: either a live instance reused across calls, or a
/// factory instantiated per call.
#[derive(Clone)]
pub enum HookRegistration {
    Instance(Arc<dyn Hook>),
    Factory(Arc<dyn HookFactory>),
}

impl HookRegistration {
    /// Resolve to a callable hook for one invocation of `node`.
    pub fn materialize(&self, node: &ModuleNode) -> Arc<dyn Hook> {
        match self {
            Self::Instance(h) => h.clone(),
            Self::Factory(f) => f.make(node),
        }
    }
}

impl From<Arc<dyn Hook>> for HookRegistration {
    fn from(h: Arc<dyn Hook>) -> Self {
        Self::Instance(h)
    }
}
