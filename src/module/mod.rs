pub mod hooks;
pub mod node;
pub mod options;
pub mod registry;

pub use hooks::{Hook, HookFactory, HookRegistration};
pub use node::{value_text, Module, ModuleId, ModuleNode, Payload, Task};
pub use options::Tunable;
pub use registry::ModuleRegistry;
