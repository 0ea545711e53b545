use crate::error::{Result, WardenError};
use crate::process::spec::ProcessSpec;
use crate::process::types::ExitResult;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A running process instance owned by one monitoring unit
#[async_trait]
pub trait ChildProcess: Send {
    /// OS process ID, if the instance has one
    fn pid(&self) -> Option<u32>;

    /// Suspend until the process terminates. Must be cancel safe.
    async fn wait(&mut self) -> ExitResult;

    /// Ask the process to exit; does not wait for it
    fn request_stop(&mut self, signal: Signal) -> Result<()>;

    /// Terminate the process without giving it a chance to clean up
    async fn kill(&mut self) -> Result<()>;
}

/// Creates process instances from specs
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ChildProcess>>;
}

/// Launches real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

#[async_trait]
impl Launcher for OsLauncher {
    async fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ChildProcess>> {
        let handle = ProcessHandle::spawn(spec)?;
        Ok(Box::new(handle))
    }
}

/// Owns exactly one OS process
///
/// The child is killed if the handle is dropped before it has been
/// reaped, so every exit path releases the process table entry.
#[derive(Debug)]
pub struct ProcessHandle {
    /// Process name from the spec
    pub name: String,

    /// Process ID assigned by the OS
    pub pid: u32,

    child: Child,
    reaped: bool,
}

impl ProcessHandle {
    /// Spawn a process from the provided spec
    ///
    /// The spec's environment is layered over the inherited one, stdin is
    /// closed, and stdout/stderr are appended to the spec's log files when
    /// configured.
    pub fn spawn(spec: &ProcessSpec) -> Result<Self> {
        let mut command = Command::new(&spec.command);

        command.args(&spec.args);

        if let Some(ref cwd) = spec.cwd {
            command.current_dir(cwd);
        }

        command.envs(&spec.env);

        command.stdin(Stdio::null());
        command.stdout(Self::output_target(spec, spec.stdout_log.as_deref())?);
        command.stderr(Self::output_target(spec, spec.stderr_log.as_deref())?);
        command.kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            WardenError::SpawnError(format!("Failed to spawn process '{}': {}", spec.name, e))
        })?;

        let pid = child.id().ok_or_else(|| {
            WardenError::SpawnError(format!("Failed to get PID for process '{}'", spec.name))
        })?;

        Ok(Self {
            name: spec.name.clone(),
            pid,
            child,
            reaped: false,
        })
    }

    fn output_target(spec: &ProcessSpec, path: Option<&Path>) -> Result<Stdio> {
        match path {
            Some(path) => Ok(Stdio::from(Self::open_log(spec, path)?)),
            None => Ok(Stdio::inherit()),
        }
    }

    fn open_log(spec: &ProcessSpec, path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    WardenError::SpawnError(format!(
                        "Failed to create log directory for '{}': {}",
                        spec.name, e
                    ))
                })?;
            }
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                WardenError::SpawnError(format!(
                    "Failed to open log file {} for '{}': {}",
                    path.display(),
                    spec.name,
                    e
                ))
            })
    }
}

#[async_trait]
impl ChildProcess for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> ExitResult {
        match self.child.wait().await {
            Ok(status) => {
                self.reaped = true;
                ExitResult::from_status(status)
            }
            Err(e) => ExitResult::WaitFailed(e.to_string()),
        }
    }

    fn request_stop(&mut self, stop_signal: Signal) -> Result<()> {
        if self.reaped {
            return Ok(());
        }

        match signal::kill(Pid::from_raw(self.pid as i32), stop_signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(WardenError::StopError(
                self.name.clone(),
                format!("Failed to send {}: {}", stop_signal, e),
            )),
        }
    }

    async fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }

        self.child.start_kill().map_err(|e| {
            WardenError::StopError(self.name.clone(), format!("Failed to send SIGKILL: {}", e))
        })?;

        self.child.wait().await.map_err(|e| {
            WardenError::StopError(self.name.clone(), format!("Wait after kill failed: {}", e))
        })?;
        self.reaped = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spawn_simple_process() {
        let spec = ProcessSpec::new("test-echo", "/bin/echo").arg("hello");

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        assert_eq!(handle.name, "test-echo");
        assert!(handle.pid > 0);
        assert_eq!(handle.wait().await, ExitResult::Exited(0));
    }

    #[tokio::test]
    async fn test_wait_reports_exit_code() {
        let spec = ProcessSpec::new("test-exit", "/bin/sh").args(["-c", "exit 3"]);

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        assert_eq!(handle.wait().await, ExitResult::Exited(3));
    }

    #[tokio::test]
    async fn test_spawn_with_merged_env() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("env.out");
        std::env::set_var("WARDEN_SPAWNER_INHERITED", "inherited");

        let spec = ProcessSpec::new("test-env", "/bin/sh")
            .args([
                "-c",
                "echo \"$WARDEN_SPAWNER_INHERITED $WARDEN_SPAWNER_OWN\"",
            ])
            .env("WARDEN_SPAWNER_OWN", "own")
            .logs(Some(out.clone()), None);

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        assert_eq!(handle.wait().await, ExitResult::Exited(0));

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "inherited own");
    }

    #[tokio::test]
    async fn test_spec_env_wins_on_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("conflict.out");
        std::env::set_var("WARDEN_SPAWNER_CONFLICT", "parent");

        let spec = ProcessSpec::new("test-conflict", "/bin/sh")
            .args(["-c", "echo $WARDEN_SPAWNER_CONFLICT"])
            .env("WARDEN_SPAWNER_CONFLICT", "spec")
            .logs(Some(out.clone()), None);

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        handle.wait().await;

        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "spec");
    }

    #[tokio::test]
    async fn test_spawn_with_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("logs").join("pwd.out");

        let spec = ProcessSpec::new("test-pwd", "/bin/pwd")
            .cwd(temp_dir.path())
            .logs(Some(out.clone()), None);

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        handle.wait().await;

        let written = std::fs::read_to_string(&out).unwrap();
        let expected = temp_dir.path().canonicalize().unwrap();
        assert_eq!(
            Path::new(written.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let spec = ProcessSpec::new("test-nonexistent", "/nonexistent/script");

        match ProcessHandle::spawn(&spec) {
            Err(WardenError::SpawnError(msg)) => assert!(msg.contains("test-nonexistent")),
            other => panic!("Expected SpawnError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_invalid_working_directory() {
        let spec = ProcessSpec::new("test-invalid-cwd", "/bin/echo").cwd("/nonexistent/directory");

        assert!(matches!(
            ProcessHandle::spawn(&spec),
            Err(WardenError::SpawnError(_))
        ));
    }

    #[tokio::test]
    async fn test_request_stop_terminates_with_signal() {
        let spec = ProcessSpec::new("test-stop", "/bin/sleep").arg("30");

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        handle.request_stop(Signal::SIGTERM).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert_eq!(exit, ExitResult::Signaled(Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn test_kill_reaps_process() {
        let spec = ProcessSpec::new("test-kill", "/bin/sleep").arg("30");

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        handle.kill().await.unwrap();

        assert_eq!(
            handle.wait().await,
            ExitResult::Signaled(Signal::SIGKILL as i32)
        );

        // Signalling an already reaped process is a no-op
        assert!(handle.request_stop(Signal::SIGTERM).is_ok());
        assert!(handle.kill().await.is_ok());
    }

    #[tokio::test]
    async fn test_os_launcher() {
        let spec = ProcessSpec::new("test-launcher", "true");

        let mut child = OsLauncher.launch(&spec).await.unwrap();
        assert!(child.pid().is_some());
        assert_eq!(child.wait().await, ExitResult::Exited(0));
    }
}
