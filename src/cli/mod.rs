// CLI module - User-facing command-line interface

mod output;

pub use output::print_error;

use crate::config::ConfigFile;
use crate::error::{Result, WardenError};
use crate::ipc::{Command, IpcClient, Response, ResponseData, DEFAULT_SOCKET_PATH};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Warden - a small process supervisor
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Control socket of the running daemon
    #[arg(
        short,
        long,
        global = true,
        env = "WARDEN_SOCKET",
        value_name = "PATH",
        default_value = DEFAULT_SOCKET_PATH
    )]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the status of all processes, or details of one
    Status {
        /// Process name
        name: Option<String>,
    },

    /// Start a stopped process
    Start {
        /// Process name
        name: String,
    },

    /// Start every stopped process
    StartAll,

    /// Stop a process; it will not be restarted
    Stop {
        /// Process name
        name: String,
    },

    /// Stop a process and start it again
    Restart {
        /// Process name
        name: String,
    },

    /// Stop every process and exit the daemon
    Shutdown,

    /// Check a configuration file without contacting the daemon
    Validate {
        /// Configuration file (.toml or .json)
        config: PathBuf,
    },
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    /// Execute the parsed command
    fn execute(&self) -> Result<()> {
        let command = match (&self.command, self.build_command()) {
            (Commands::Validate { config }, _) => return Self::validate(config),
            (_, Some(command)) => command,
            (_, None) => return Ok(()),
        };
        let detailed = matches!(self.command, Commands::Status { name: Some(_) });
        let client = IpcClient::with_socket_path(&self.socket);

        let response = if matches!(command, Command::Shutdown) {
            let pb = output::create_progress_bar("Stopping all processes...");
            match client.send_command(command) {
                Ok(response) => {
                    output::finish_progress_success(pb, "Daemon stopped");
                    response
                }
                Err(e) => {
                    output::finish_progress_error(pb, "Shutdown failed");
                    return Err(e);
                }
            }
        } else {
            client.send_command(command)?
        };

        let data = Self::response_data(response)?;
        output::print_success(&data, detailed);
        Ok(())
    }

    /// The daemon's answer, with its error message passed through unchanged
    ///
    /// `main` prints the error, so nothing is printed here.
    fn response_data(response: Response) -> Result<ResponseData> {
        response.result.map_err(WardenError::Other)
    }

    /// Build an IPC command from the CLI arguments
    ///
    /// `None` for commands that are handled locally.
    fn build_command(&self) -> Option<Command> {
        let command = match &self.command {
            Commands::Status { name } => Command::Status { name: name.clone() },
            Commands::Start { name } => Command::Start { name: name.clone() },
            Commands::StartAll => Command::StartAll,
            Commands::Stop { name } => Command::Stop { name: name.clone() },
            Commands::Restart { name } => Command::Restart { name: name.clone() },
            Commands::Shutdown => Command::Shutdown,
            Commands::Validate { .. } => return None,
        };
        Some(command)
    }

    fn validate(path: &Path) -> Result<()> {
        let config = ConfigFile::from_file(path)?;
        let specs = config.specs()?;

        output::print_success(
            &ResponseData::Success(format!("{} is valid", path.display())),
            false,
        );
        output::print_spec_table(&specs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let cli = Cli::try_parse_from(["warden", "status"]).unwrap();
        assert_eq!(cli.build_command(), Some(Command::Status { name: None }));

        let cli = Cli::try_parse_from(["warden", "status", "api"]).unwrap();
        assert_eq!(
            cli.build_command(),
            Some(Command::Status {
                name: Some("api".to_string())
            })
        );
    }

    #[test]
    fn test_parse_lifecycle_commands() {
        let cli = Cli::try_parse_from(["warden", "stop", "api"]).unwrap();
        assert_eq!(
            cli.build_command(),
            Some(Command::Stop {
                name: "api".to_string()
            })
        );

        let cli = Cli::try_parse_from(["warden", "start-all"]).unwrap();
        assert_eq!(cli.build_command(), Some(Command::StartAll));

        let cli = Cli::try_parse_from(["warden", "restart", "worker"]).unwrap();
        assert_eq!(
            cli.build_command(),
            Some(Command::Restart {
                name: "worker".to_string()
            })
        );
    }

    #[test]
    fn test_socket_flag_is_global() {
        let cli =
            Cli::try_parse_from(["warden", "shutdown", "--socket", "/run/w.sock"]).unwrap();
        assert_eq!(cli.socket, PathBuf::from("/run/w.sock"));
        assert_eq!(cli.build_command(), Some(Command::Shutdown));
    }

    #[test]
    fn test_validate_is_local() {
        let cli = Cli::try_parse_from(["warden", "validate", "warden.toml"]).unwrap();
        assert_eq!(cli.build_command(), None);
    }

    #[test]
    fn test_daemon_error_is_reported_once() {
        let response = Response::error(4, "Process not found: ghost".to_string());
        let err = Cli::response_data(response).unwrap_err();
        // `main` adds the only prefix
        assert_eq!(err.to_string(), "Process not found: ghost");

        let response = Response::success(5, ResponseData::StartedAll { count: 2 });
        assert_eq!(
            Cli::response_data(response).unwrap(),
            ResponseData::StartedAll { count: 2 }
        );
    }

    #[test]
    fn test_start_requires_name() {
        assert!(Cli::try_parse_from(["warden", "start"]).is_err());
    }
}
