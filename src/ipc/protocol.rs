// IPC Protocol definitions for client-daemon communication
//
// Every message is one JSON document on its own line.

use crate::process::{ProcessState, ShutdownReport};
use serde::{Deserialize, Serialize};

/// All available commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Snapshot of one unit, or of all of them when `name` is absent
    Status { name: Option<String> },
    Start { name: String },
    StartAll,
    Stop { name: String },
    Restart { name: String },
    /// Stop every unit and exit the daemon
    Shutdown,
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Unit snapshots in configuration order
    Status(Vec<ProcessState>),
    Started { name: String },
    /// Number of stopped units that were relaunched
    StartedAll { count: usize },
    Stopped { name: String },
    Restarted { name: String },
    ShutdownComplete(ShutdownReport),
    /// Generic success message
    Success(String),
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}
