use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Lifecycle status of a supervised unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopped,
    Crashed,
    Restarting,
    Halted,
}

impl ProcessStatus {
    /// Whether the unit has come to rest and will not relaunch on its own
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Stopped | ProcessStatus::Halted)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Crashed => write!(f, "crashed"),
            ProcessStatus::Restarting => write!(f, "restarting"),
            ProcessStatus::Halted => write!(f, "halted"),
        }
    }
}

/// How a process instance ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitResult {
    /// Exited on its own with a status code
    Exited(i32),
    /// Terminated by a signal
    Signaled(i32),
    /// Never started
    SpawnFailed(String),
    /// The OS could not report the exit status
    WaitFailed(String),
}

impl ExitResult {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitResult::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitResult::Exited(0))
    }

    #[cfg(unix)]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ExitResult::Exited(code),
            (None, Some(signal)) => ExitResult::Signaled(signal),
            (None, None) => ExitResult::WaitFailed(format!("unrecognized exit status: {status}")),
        }
    }
}

impl std::fmt::Display for ExitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitResult::Exited(code) => write!(f, "exit code {}", code),
            ExitResult::Signaled(signal) => write!(f, "signal {}", signal),
            ExitResult::SpawnFailed(reason) => write!(f, "spawn failed: {}", reason),
            ExitResult::WaitFailed(reason) => write!(f, "wait failed: {}", reason),
        }
    }
}

/// Point-in-time view of one unit, published by its monitoring task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    pub name: String,
    pub status: ProcessStatus,
    /// Only set while `Running`
    pub pid: Option<u32>,
    pub last_exit: Option<ExitResult>,
    pub restart_count: usize,
    pub last_started_at: Option<SystemTime>,
    pub last_exited_at: Option<SystemTime>,
}

impl ProcessState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProcessStatus::Starting,
            pid: None,
            last_exit: None,
            restart_count: 0,
            last_started_at: None,
            last_exited_at: None,
        }
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit.as_ref().and_then(ExitResult::code)
    }

    /// Time since the current instance started, while it is running
    pub fn uptime(&self) -> Option<Duration> {
        if self.status != ProcessStatus::Running {
            return None;
        }

        self.last_started_at.map(|started| {
            SystemTime::now()
                .duration_since(started)
                .unwrap_or(Duration::from_secs(0))
        })
    }

    pub(crate) fn mark_starting(&mut self, relaunch: bool) {
        self.status = ProcessStatus::Starting;
        if relaunch {
            self.restart_count += 1;
        }
    }

    pub(crate) fn mark_running(&mut self, pid: Option<u32>, at: SystemTime) {
        self.status = ProcessStatus::Running;
        self.pid = pid;
        self.last_started_at = Some(at);
    }

    pub(crate) fn mark_exited(&mut self, status: ProcessStatus, exit: ExitResult, at: SystemTime) {
        self.status = status;
        self.pid = None;
        self.last_exit = Some(exit);
        self.last_exited_at = Some(at);
    }
}

/// A single status transition of one unit
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub name: String,
    pub from: ProcessStatus,
    pub to: ProcessStatus,
    pub at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Running.to_string(), "running");
        assert_eq!(ProcessStatus::Restarting.to_string(), "restarting");
        assert_eq!(ProcessStatus::Halted.to_string(), "halted");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ProcessStatus::Stopped.is_terminal());
        assert!(ProcessStatus::Halted.is_terminal());
        assert!(!ProcessStatus::Crashed.is_terminal());
        assert!(!ProcessStatus::Restarting.is_terminal());
    }

    #[test]
    fn test_exit_code_only_for_normal_exit() {
        assert_eq!(ExitResult::Exited(3).code(), Some(3));
        assert_eq!(ExitResult::Signaled(9).code(), None);
        assert_eq!(ExitResult::SpawnFailed("nope".into()).code(), None);
        assert!(ExitResult::Exited(0).is_success());
        assert!(!ExitResult::Exited(1).is_success());
    }

    #[test]
    fn test_state_lifecycle_bookkeeping() {
        let mut state = ProcessState::new("api");
        assert_eq!(state.status, ProcessStatus::Starting);
        assert_eq!(state.restart_count, 0);

        state.mark_running(Some(42), SystemTime::now());
        assert_eq!(state.pid, Some(42));
        assert!(state.uptime().is_some());

        state.mark_exited(ProcessStatus::Crashed, ExitResult::Exited(1), SystemTime::now());
        assert_eq!(state.pid, None);
        assert_eq!(state.last_exit_code(), Some(1));
        assert!(state.uptime().is_none());

        state.mark_starting(true);
        assert_eq!(state.restart_count, 1);
        state.mark_starting(false);
        assert_eq!(state.restart_count, 1);
    }

    #[test]
    fn test_state_serializes_for_status_surface() {
        let mut state = ProcessState::new("worker");
        state.mark_exited(ProcessStatus::Crashed, ExitResult::Signaled(15), SystemTime::now());

        let json = serde_json::to_string(&state).unwrap();
        let back: ProcessState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
