pub mod collector;
pub mod phase;
pub mod scheduler;

pub use collector::{collect_tasks, PhaseTasks};
pub use phase::{parse_phases, Mode, Phase};
pub use scheduler::{DeployWatch, PhaseRunner};
