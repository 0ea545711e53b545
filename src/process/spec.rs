use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default grace period between the stop signal and SIGKILL
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable description of one supervised unit
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    /// Unique name within a supervisor
    pub name: String,

    /// Executable path or interpreter binary
    pub command: String,

    pub args: Vec<String>,

    pub cwd: Option<PathBuf>,

    /// Overrides layered over the inherited environment
    pub env: HashMap<String, String>,

    /// Wait between an exit and the next launch
    pub restart_delay: Duration,

    pub stop_signal: Signal,

    pub stop_timeout: Duration,

    /// Append child stdout here instead of inheriting it
    pub stdout_log: Option<PathBuf>,

    /// Append child stderr here instead of inheriting it
    pub stderr_log: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            restart_delay: Duration::ZERO,
            stop_signal: Signal::SIGTERM,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            stdout_log: None,
            stderr_log: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn stop_signal(mut self, signal: Signal) -> Self {
        self.stop_signal = signal;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn logs(mut self, stdout: Option<PathBuf>, stderr: Option<PathBuf>) -> Self {
        self.stdout_log = stdout;
        self.stderr_log = stderr;
        self
    }

    /// Command and arguments joined for display
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec = ProcessSpec::new("worker-a", "true");
        assert_eq!(spec.name, "worker-a");
        assert!(spec.args.is_empty());
        assert!(spec.env.is_empty());
        assert_eq!(spec.restart_delay, Duration::ZERO);
        assert_eq!(spec.stop_signal, Signal::SIGTERM);
        assert_eq!(spec.stop_timeout, DEFAULT_STOP_TIMEOUT);
    }

    #[test]
    fn test_spec_builder() {
        let spec = ProcessSpec::new("bot", "python3")
            .arg("bot.py")
            .args(["--verbose", "--port=8080"])
            .env("NODE_ENV", "production")
            .restart_delay(Duration::from_millis(3000))
            .stop_signal(Signal::SIGINT);

        assert_eq!(spec.args, vec!["bot.py", "--verbose", "--port=8080"]);
        assert_eq!(spec.env.get("NODE_ENV"), Some(&"production".to_string()));
        assert_eq!(spec.restart_delay, Duration::from_secs(3));
        assert_eq!(spec.stop_signal, Signal::SIGINT);
        assert_eq!(spec.command_line(), "python3 bot.py --verbose --port=8080");
    }
}
