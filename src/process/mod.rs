// Process module - Unit lifecycle and supervision

pub mod restart;
pub mod spawner;
pub mod spec;
mod supervisor;
pub mod types;
mod unit;

pub use restart::RestartPolicy;
pub use spawner::{ChildProcess, Launcher, OsLauncher, ProcessHandle};
pub use spec::ProcessSpec;
pub use supervisor::{
    ShutdownReport, Supervisor, SupervisorOptions, DEFAULT_KILL_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use types::{ExitResult, ProcessState, ProcessStatus, StatusEvent};
