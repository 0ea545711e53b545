// Library exports for the Warden process supervisor

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod process;
pub mod report;

pub use error::{Result, WardenError};
pub use process::{ProcessSpec, ProcessState, ProcessStatus, ShutdownReport, Supervisor};
