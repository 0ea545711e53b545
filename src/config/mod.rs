use crate::error::{Result, WardenError};
use crate::process::{ProcessSpec, SupervisorOptions};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stop signals accepted in configuration files
pub const VALID_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// Interpreter value that means "run the script directly"
const NO_INTERPRETER: &str = "none";

/// A whole configuration file: supervisor settings plus the apps to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default, alias = "processes")]
    pub apps: Vec<ProcessConfig>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Settings shared by every app and by the daemon itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Default restart delay for apps (in milliseconds)
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Default grace period before SIGKILL (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Window for every app to stop during shutdown (in seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Wait after a forced kill (in seconds)
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_secs: u64,

    /// Control socket location
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Directory for per-app output logs
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Tracing filter used when WARDEN_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Interval of the periodic status log line (0 disables it)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

/// One app entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Process name (unique identifier)
    pub name: String,

    /// Script or executable to run
    pub script: String,

    /// Interpreter that runs `script`, e.g. "python3"
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Arguments passed to the interpreter before the script
    #[serde(default)]
    pub interpreter_args: Vec<String>,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Delay before restart (in milliseconds)
    #[serde(default, alias = "restart_delay_ms")]
    pub restart_delay: Option<u64>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Signal to send on stop (default: SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Timeout before force kill (in seconds)
    #[serde(default)]
    pub stop_timeout_secs: Option<u64>,

    /// File receiving the process's stdout
    #[serde(default)]
    pub out_file: Option<PathBuf>,

    /// File receiving the process's stderr
    #[serde(default)]
    pub error_file: Option<PathBuf>,
}

// Default value functions for serde
fn default_restart_delay_ms() -> u64 {
    1000
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    15
}

fn default_kill_timeout() -> u64 {
    2
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/warden.sock")
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_status_interval() -> u64 {
    60
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: default_restart_delay_ms(),
            stop_timeout_secs: default_stop_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            kill_timeout_secs: default_kill_timeout(),
            socket_path: default_socket_path(),
            log_dir: None,
            log_filter: default_log_filter(),
            status_interval_secs: default_status_interval(),
        }
    }
}

impl SupervisorConfig {
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            kill_timeout: Duration::from_secs(self.kill_timeout_secs),
            ..SupervisorOptions::default()
        }
    }

    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

impl ConfigFile {
    /// Load a configuration file (supports TOML and JSON)
    ///
    /// Environment variables are expanded, relative paths are resolved
    /// against the file's directory, and the result is validated.
    pub fn from_file(path: &Path) -> Result<ConfigFile> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WardenError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let mut config = Self::parse(&contents, extension)?;

        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        config.base_dir = std::path::absolute(&base_dir).unwrap_or(base_dir);

        config.prepare();
        config.validate()?;

        Ok(config)
    }

    /// Parse file contents in the format named by `extension`
    pub fn parse(contents: &str, extension: &str) -> Result<ConfigFile> {
        match extension {
            "toml" => toml::from_str(contents)
                .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e))),
            "json" => serde_json::from_str(contents)
                .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e))),
            _ => Err(WardenError::InvalidConfig(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }

    /// Expand environment variables and resolve relative paths
    fn prepare(&mut self) {
        let base_dir = self.base_dir.clone();

        if let Some(ref log_dir) = self.supervisor.log_dir {
            self.supervisor.log_dir = Some(base_dir.join(expand_env_in_path(log_dir)));
        }
        if self.supervisor.socket_path.is_relative() {
            self.supervisor.socket_path = base_dir.join(&self.supervisor.socket_path);
        }

        for app in &mut self.apps {
            app.expand_env_vars();
            app.resolve_paths(&base_dir, self.supervisor.log_dir.as_deref());
        }
    }

    /// Validate the whole file
    pub fn validate(&self) -> Result<()> {
        if self.apps.is_empty() {
            return Err(WardenError::InvalidConfig(
                "No process configuration found in file".to_string(),
            ));
        }

        let mut names = HashSet::with_capacity(self.apps.len());
        for app in &self.apps {
            app.validate()?;
            if !names.insert(app.name.as_str()) {
                return Err(WardenError::ConfigValidationError(format!(
                    "Duplicate process name: {}",
                    app.name
                )));
            }
        }

        Ok(())
    }

    /// Build the process specs, in file order
    pub fn specs(&self) -> Result<Vec<ProcessSpec>> {
        self.apps
            .iter()
            .map(|app| app.to_spec(&self.supervisor))
            .collect()
    }
}

impl ProcessConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WardenError::MissingConfigField("name".to_string()));
        }

        if self.script.trim().is_empty() {
            return Err(WardenError::MissingConfigField(format!(
                "script (process '{}')",
                self.name
            )));
        }

        parse_signal(&self.stop_signal)?;

        if let Some(ref cwd) = self.cwd {
            if !cwd.exists() {
                return Err(WardenError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
            if !cwd.is_dir() {
                return Err(WardenError::ConfigValidationError(format!(
                    "Working directory is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// The interpreter to run the script with, if any
    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty() && !i.eq_ignore_ascii_case(NO_INTERPRETER))
    }

    /// Turn this entry into a spec, filling gaps from supervisor defaults
    pub fn to_spec(&self, supervisor: &SupervisorConfig) -> Result<ProcessSpec> {
        let (command, args) = match self.interpreter() {
            Some(interpreter) => {
                let args = self
                    .interpreter_args
                    .iter()
                    .cloned()
                    .chain(std::iter::once(self.script.clone()))
                    .chain(self.args.iter().cloned())
                    .collect::<Vec<_>>();
                (interpreter.to_string(), args)
            }
            None => (self.direct_command(), self.args.clone()),
        };

        let restart_delay = self.restart_delay.unwrap_or(supervisor.restart_delay_ms);
        let stop_timeout = self.stop_timeout_secs.unwrap_or(supervisor.stop_timeout_secs);

        let mut spec = ProcessSpec::new(self.name.clone(), command)
            .args(args)
            .restart_delay(Duration::from_millis(restart_delay))
            .stop_signal(parse_signal(&self.stop_signal)?)
            .stop_timeout(Duration::from_secs(stop_timeout))
            .logs(self.out_file.clone(), self.error_file.clone());

        if let Some(ref cwd) = self.cwd {
            spec = spec.cwd(cwd.clone());
        }
        spec.env = self.env.clone();

        Ok(spec)
    }

    /// Script path for direct execution
    ///
    /// Bare names are looked up on PATH; relative paths are anchored to
    /// the working directory.
    fn direct_command(&self) -> String {
        let script = Path::new(&self.script);
        match self.cwd {
            Some(ref cwd) if script.is_relative() && self.script.contains('/') => {
                cwd.join(script).to_string_lossy().into_owned()
            }
            _ => self.script.clone(),
        }
    }

    fn resolve_paths(&mut self, base_dir: &Path, log_dir: Option<&Path>) {
        self.cwd = Some(match self.cwd.take() {
            Some(cwd) => base_dir.join(cwd),
            None => base_dir.to_path_buf(),
        });

        self.out_file = match self.out_file.take() {
            Some(path) => Some(base_dir.join(path)),
            None => log_dir.map(|dir| dir.join(format!("{}-out.log", self.name))),
        };
        self.error_file = match self.error_file.take() {
            Some(path) => Some(base_dir.join(path)),
            None => log_dir.map(|dir| dir.join(format!("{}-error.log", self.name))),
        };
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        self.script = expand_env_in_string(&self.script);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(expand_env_in_path(cwd));
        }

        self.args = self
            .args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        // Values only
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Map a configured signal name to a signal
pub fn parse_signal(name: &str) -> Result<Signal> {
    let signal = match name {
        "SIGTERM" => Signal::SIGTERM,
        "SIGINT" => Signal::SIGINT,
        "SIGQUIT" => Signal::SIGQUIT,
        "SIGKILL" => Signal::SIGKILL,
        "SIGHUP" => Signal::SIGHUP,
        "SIGUSR1" => Signal::SIGUSR1,
        "SIGUSR2" => Signal::SIGUSR2,
        _ => {
            return Err(WardenError::ConfigValidationError(format!(
                "Invalid stop_signal: {}. Must be one of: {}",
                name,
                VALID_SIGNALS.join(", ")
            )))
        }
    };
    Ok(signal)
}

/// Expand `$VAR` and `${VAR}` from the environment
///
/// Unknown variables are left as written.
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, remainder) = match after.strip_prefix('{') {
            Some(braced) => match braced.find('}') {
                Some(end) => (&braced[..end], &braced[end + 1..]),
                None => ("", after),
            },
            None => {
                let len = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..len], &after[len..])
            }
        };

        match lookup_var(name) {
            Some(value) => {
                result.push_str(&value);
                rest = remainder;
            }
            None => {
                result.push('$');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

fn lookup_var(name: &str) -> Option<String> {
    let valid = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        std::env::var(name).ok()
    } else {
        None
    }
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}
