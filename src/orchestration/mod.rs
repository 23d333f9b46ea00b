// Per-symbol engine lifecycle
pub mod registry;
pub mod supervisor;

pub use registry::{BotRegistry, EngineHandle};
pub use supervisor::{Reconciliation, Supervisor};
