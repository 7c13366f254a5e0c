//! Container session orchestration: launching, supervising and attaching to
//! the containers that back hangar instances.

pub mod catalog;
pub mod config;
pub mod console;
pub mod data_dir;
pub mod error;
pub mod executor;
pub mod instances;
pub mod launch;
pub mod lifecycle;
pub mod port_alloc;
pub mod registry;
pub mod runtime;
pub mod stats;

#[cfg(all(test, unix))]
mod testing;

pub use catalog::TemplateCatalog;
pub use config::RuntimeConfig;
pub use console::{ConsoleRegistry, SessionState};
pub use error::{ExecError, OrchestratorError, Result};
pub use executor::{CommandExecutor, CommandOutput};
pub use instances::InstanceManager;
pub use lifecycle::{InstanceGuard, LifecycleManager};
pub use registry::{InstanceRegistry, JsonFileRegistry, MemoryRegistry};
pub use runtime::ContainerRuntime;
pub use stats::StatsPoller;
