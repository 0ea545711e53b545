// Daemon module - Runs the supervisor behind the control socket

use crate::config::ConfigFile;
use crate::error::{Result, WardenError};
use crate::ipc::{Command, IpcServer, ResponseData};
use crate::process::{OsLauncher, Supervisor};
use crate::report::{LogReporter, StatusReporter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Owns a running supervisor and serves control requests for it
pub struct Daemon {
    supervisor: Arc<Supervisor>,
    socket_path: PathBuf,
    status_interval: Option<Duration>,
    shutdown: Arc<Notify>,
}

impl Daemon {
    /// Start every app in `config` and prepare to serve on `socket_path`
    pub fn start(config: &ConfigFile, socket_path: Option<PathBuf>) -> Result<Self> {
        let specs = config.specs()?;
        let supervisor = Supervisor::start_with(
            specs,
            Arc::new(OsLauncher),
            config.supervisor.supervisor_options(),
        )?;

        Ok(Self::with_supervisor(
            Arc::new(supervisor),
            socket_path.unwrap_or_else(|| config.supervisor.socket_path.clone()),
            config.supervisor.status_interval(),
        ))
    }

    pub fn with_supervisor<P: AsRef<Path>>(
        supervisor: Arc<Supervisor>,
        socket_path: P,
        status_interval: Option<Duration>,
    ) -> Self {
        Self {
            supervisor,
            socket_path: socket_path.as_ref().to_path_buf(),
            status_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve control requests until SIGINT, SIGTERM or a `Shutdown` request,
    /// then stop every unit
    pub async fn run(self) -> Result<()> {
        let server = IpcServer::bind(&self.socket_path)?;
        info!(socket = %server.socket_path().display(), "control socket listening");

        let reporter = self.status_interval.map(|every| {
            let supervisor = Arc::clone(&self.supervisor);
            tokio::spawn(report_status(supervisor, every))
        });

        let handler = {
            let supervisor = Arc::clone(&self.supervisor);
            let shutdown = Arc::clone(&self.shutdown);
            move |command| {
                let supervisor = Arc::clone(&supervisor);
                let shutdown = Arc::clone(&shutdown);
                async move { Self::handle_command(&supervisor, &shutdown, command).await }
            }
        };

        let outcome = tokio::select! {
            result = server.serve(handler, self.shutdown.notified()) => {
                info!("shutdown requested over the control socket");
                result
            }
            received = wait_for_signal() => received.map(|name| {
                info!(signal = name, "received signal, shutting down");
            }),
        };

        if let Some(reporter) = reporter {
            reporter.abort();
        }

        let report = self.supervisor.shutdown_all().await;
        for warning in report.warnings() {
            warn!("{}", warning);
        }

        drop(server);
        info!("daemon stopped");

        outcome
    }

    /// Map one control command onto the supervisor
    pub async fn handle_command(
        supervisor: &Supervisor,
        shutdown: &Notify,
        command: Command,
    ) -> Result<ResponseData> {
        match command {
            Command::Status { name: None } => Ok(ResponseData::Status(supervisor.snapshots())),

            Command::Status { name: Some(name) } => {
                Ok(ResponseData::Status(vec![supervisor.get(&name)?]))
            }

            Command::Start { name } => {
                supervisor.start_process(&name).await?;
                Ok(ResponseData::Started { name })
            }

            Command::StartAll => {
                let count = supervisor.start_all().await?;
                Ok(ResponseData::StartedAll { count })
            }

            Command::Stop { name } => {
                supervisor.stop(&name)?;
                Ok(ResponseData::Stopped { name })
            }

            Command::Restart { name } => {
                supervisor.restart(&name).await?;
                Ok(ResponseData::Restarted { name })
            }

            Command::Shutdown => {
                let report = supervisor.shutdown_all().await;
                shutdown.notify_one();
                Ok(ResponseData::ShutdownComplete(report))
            }
        }
    }
}

/// Log a status line per unit every `every`
async fn report_status(supervisor: Arc<Supervisor>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        LogReporter.report(&supervisor.snapshots());
    }
}

/// Resolve with the name of the first termination signal received
async fn wait_for_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| WardenError::SignalError(format!("Failed to setup SIGTERM handler: {}", e)))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| WardenError::SignalError(format!("Failed to setup SIGINT handler: {}", e)))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    Ok(name)
}
