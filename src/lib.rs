//! modflow - composing independently deployable computation modules into
//! a graph, orchestrating them through lifecycle phases and invoking them
//! transparently whether they run in-process or behind a network
//! endpoint.

// Core infrastructure modules
pub mod core {
    pub mod context;
    pub mod errors;
    pub mod sink;
}

// Domain modules
pub mod module; // module graph, hooks, tunables, registry
pub mod phases; // phase task collection and scheduling
pub mod remote; // endpoint discovery, wire protocol, RPC, launchers

// Re-exports for convenience
pub use crate::core::context::{InvocationContext, KwArgs};
pub use crate::core::errors::{ModError, Result};
pub use crate::core::sink::{ChannelSink, NullSink, StreamSink};
pub use module::{Hook, HookFactory, HookRegistration, Module, ModuleId, ModuleNode, ModuleRegistry, Payload, Task, Tunable};
pub use phases::{collect_tasks, parse_phases, DeployWatch, Phase, PhaseRunner, PhaseTasks};
pub use remote::{
    CoordinationStore, EndpointLocator, EndpointSlot, Launcher, LauncherLifecycle, LauncherStatus,
    MemoryStore, RemoteInvoker, ServerModule, StreamOptions,
};
