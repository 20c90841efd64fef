pub mod endpoint;
pub mod invoker;
pub mod launcher;
pub mod server;
pub mod store;
pub mod wire;

pub use endpoint::{EndpointLocator, EndpointSlot};
pub use invoker::{RemoteInvoker, StreamOptions};
pub use launcher::{Launcher, LauncherLifecycle, LauncherStatus};
pub use server::ServerModule;
pub use store::{CoordinationStore, MemoryStore};
