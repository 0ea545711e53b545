use crate::error::{Result, WardenError};
use crate::process::spawner::{Launcher, OsLauncher};
use crate::process::spec::ProcessSpec;
use crate::process::types::{ProcessState, StatusEvent};
use crate::process::unit::{
    wait_for_directive, wait_for_state, Directive, MonitoringUnit, StatePublisher,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// Default window for every unit to stop during shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Default wait after a forced kill before the unit task is abandoned
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime options for a supervisor
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub shutdown_timeout: Duration,
    pub kill_timeout: Duration,
    /// Buffered status events per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            event_capacity: 256,
        }
    }
}

/// Outcome of `Supervisor::shutdown_all`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Units that stopped within the shutdown window
    pub stopped: Vec<String>,
    /// Units that had to be force-terminated
    pub forced: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }

    /// One `ShutdownTimeout` per force-terminated unit
    pub fn warnings(&self) -> Vec<WardenError> {
        self.forced
            .iter()
            .map(|name| WardenError::ShutdownTimeout(name.clone()))
            .collect()
    }
}

struct Unit {
    spec: Arc<ProcessSpec>,
    publisher: StatePublisher,
    directive: watch::Sender<Directive>,
    /// Bumped by every `stop`; a pending start yields to a newer stop
    stops: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the monitoring units for a fixed set of specs
pub struct Supervisor {
    units: Vec<Unit>,
    index: HashMap<String, usize>,
    launcher: Arc<dyn Launcher>,
    options: SupervisorOptions,
    events: broadcast::Sender<StatusEvent>,
    shut_down: AtomicBool,
    shutdown_done: watch::Sender<bool>,
}

impl Supervisor {
    /// Start supervising `specs` as real OS processes
    pub fn start(specs: Vec<ProcessSpec>) -> Result<Self> {
        Self::start_with(specs, Arc::new(OsLauncher), SupervisorOptions::default())
    }

    /// Start supervising `specs` through a custom launcher
    ///
    /// Every spec is validated before anything is launched; a bad spec set
    /// starts nothing. Must be called from within a tokio runtime.
    pub fn start_with(
        specs: Vec<ProcessSpec>,
        launcher: Arc<dyn Launcher>,
        options: SupervisorOptions,
    ) -> Result<Self> {
        Self::validate(&specs)?;

        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let mut units = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());

        for spec in specs {
            let spec = Arc::new(spec);
            let (state_tx, _) = watch::channel(ProcessState::new(spec.name.clone()));
            let publisher = StatePublisher::new(Arc::new(state_tx), events.clone());
            let (directive, directive_rx) = watch::channel(Directive::Run);

            let handle = spawn_unit(&spec, &launcher, &publisher, directive_rx, false);

            index.insert(spec.name.clone(), units.len());
            units.push(Unit {
                spec,
                publisher,
                directive,
                stops: AtomicU64::new(0),
                task: Mutex::new(Some(handle)),
            });
        }

        info!(units = units.len(), "supervisor started");

        Ok(Self {
            units,
            index,
            launcher,
            options,
            events,
            shut_down: AtomicBool::new(false),
            shutdown_done: watch::channel(false).0,
        })
    }

    fn validate(specs: &[ProcessSpec]) -> Result<()> {
        let mut seen = HashMap::with_capacity(specs.len());

        for spec in specs {
            if spec.name.is_empty() {
                return Err(WardenError::ConfigError(
                    "process name must not be empty".to_string(),
                ));
            }

            if spec.command.is_empty() {
                return Err(WardenError::ConfigError(format!(
                    "process '{}' has an empty command",
                    spec.name
                )));
            }

            if seen.insert(spec.name.as_str(), ()).is_some() {
                return Err(WardenError::ConfigError(format!(
                    "duplicate process name: {}",
                    spec.name
                )));
            }
        }

        Ok(())
    }

    fn unit(&self, name: &str) -> Result<&Unit> {
        self.index
            .get(name)
            .map(|&i| &self.units[i])
            .ok_or_else(|| WardenError::ProcessNotFound(name.to_string()))
    }

    fn ensure_active(&self, name: &str) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(WardenError::InvalidProcessState(
                name.to_string(),
                "supervisor has shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Snapshot of every unit, keyed by name
    ///
    /// Each entry is a consistent copy of that unit's last published state;
    /// this never waits on a process or a restart delay.
    pub fn status(&self) -> BTreeMap<String, ProcessState> {
        self.units
            .iter()
            .map(|unit| (unit.spec.name.clone(), unit.publisher.snapshot()))
            .collect()
    }

    /// Same as `status`, in configuration order
    pub fn snapshots(&self) -> Vec<ProcessState> {
        self.units
            .iter()
            .map(|unit| unit.publisher.snapshot())
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<ProcessState> {
        Ok(self.unit(name)?.publisher.snapshot())
    }

    pub fn spec(&self, name: &str) -> Result<&ProcessSpec> {
        Ok(self.unit(name)?.spec.as_ref())
    }

    /// Unit names in configuration order
    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Receive every status transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Ask a unit to stop; it will not be restarted automatically
    ///
    /// Returns once the request is recorded. The unit signals its process
    /// and settles into `Stopped` on its own.
    pub fn stop(&self, name: &str) -> Result<()> {
        let unit = self.unit(name)?;
        unit.stops.fetch_add(1, Ordering::SeqCst);

        let changed = unit.directive.send_if_modified(|d| {
            if *d == Directive::Run {
                *d = Directive::Stop;
                true
            } else {
                false
            }
        });

        if changed {
            info!(process = name, "stop requested");
        }

        Ok(())
    }

    /// Relaunch a stopped unit
    ///
    /// A running unit is left alone. A unit that is still stopping is
    /// awaited first.
    pub async fn start_process(&self, name: &str) -> Result<()> {
        let unit = self.unit(name)?;
        self.start_unit(unit).await.map(|_| ())
    }

    /// Relaunch every stopped unit, returning how many were started
    pub async fn start_all(&self) -> Result<usize> {
        let mut started = 0;
        for unit in &self.units {
            if self.start_unit(unit).await? {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Stop a unit and launch it again
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.stop(name)?;
        self.start_process(name).await
    }

    async fn start_unit(&self, unit: &Unit) -> Result<bool> {
        let name = unit.spec.name.as_str();
        self.ensure_active(name)?;
        let stops = unit.stops.load(Ordering::SeqCst);

        let settled = {
            let task = unit.task.lock().await;
            let alive = task.as_ref().map_or(false, |h| !h.is_finished());
            if alive && !unit.directive.borrow().is_stop() {
                return Ok(false);
            }
            !alive
        };

        // Wait out the previous run without holding the task lock, so a
        // shutdown can still collect it
        if !settled {
            let mut state = unit.publisher.watch();
            let mut directive = unit.directive.subscribe();
            tokio::select! {
                _ = wait_for_state(&mut state, |s| s.status.is_terminal()) => {}
                _ = wait_for_directive(&mut directive, Directive::halts) => {}
            }
        }

        let mut task = unit.task.lock().await;
        self.ensure_active(name)?;

        if unit.stops.load(Ordering::SeqCst) != stops {
            info!(process = name, "start superseded by a later stop request");
            return Ok(false);
        }

        // Another start got here first
        let alive = task.as_ref().map_or(false, |h| !h.is_finished());
        if alive && !unit.directive.borrow().is_stop() {
            return Ok(false);
        }

        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!(process = name, error = %e, "unit task ended abnormally");
            }
        }

        let resumed = unit.directive.send_if_modified(|d| {
            if d.halts() {
                false
            } else {
                *d = Directive::Run;
                true
            }
        });
        if !resumed {
            return Err(WardenError::InvalidProcessState(
                name.to_string(),
                "supervisor has shut down".to_string(),
            ));
        }

        *task = Some(spawn_unit(
            &unit.spec,
            &self.launcher,
            &unit.publisher,
            unit.directive.subscribe(),
            true,
        ));

        info!(process = name, "unit started");
        Ok(true)
    }

    /// Stop every unit and wait for them, force-terminating stragglers
    ///
    /// Units get `shutdown_timeout` to stop gracefully. Any still running
    /// are killed and given `kill_timeout`; past that their task is aborted,
    /// which kills the child when its handle drops. Every unit ends
    /// `Halted`. Later calls wait for the first to finish and return an
    /// empty report.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            let mut done = self.shutdown_done.subscribe();
            let _ = done.wait_for(|done| *done).await.is_ok();
            return ShutdownReport::default();
        }
        info!(
            units = self.units.len(),
            timeout = ?self.options.shutdown_timeout,
            "shutting down all units"
        );

        // Every unit hears about the shutdown before any task lock is taken
        for unit in &self.units {
            unit.directive.send_if_modified(|d| {
                if *d == Directive::Kill {
                    false
                } else {
                    *d = Directive::Shutdown;
                    true
                }
            });
        }

        let deadline = Instant::now() + self.options.shutdown_timeout;
        let mut report = ShutdownReport::default();
        let mut pending = Vec::new();

        for unit in &self.units {
            match unit.task.lock().await.take() {
                Some(handle) => pending.push((unit, handle)),
                // Reaped by a start that lost the race with shutdown
                None => report.stopped.push(unit.spec.name.clone()),
            }
        }

        let mut stragglers = Vec::new();

        for (unit, mut handle) in pending {
            match timeout_at(deadline, &mut handle).await {
                Ok(_) => report.stopped.push(unit.spec.name.clone()),
                Err(_) => stragglers.push((unit, handle)),
            }
        }

        if !stragglers.is_empty() {
            for (unit, _) in &stragglers {
                warn!(
                    process = %unit.spec.name,
                    "{}",
                    WardenError::ShutdownTimeout(unit.spec.name.clone())
                );
                unit.directive.send_replace(Directive::Kill);
            }

            let kill_deadline = Instant::now() + self.options.kill_timeout;
            for (unit, mut handle) in stragglers {
                if timeout_at(kill_deadline, &mut handle).await.is_err() {
                    error!(
                        process = %unit.spec.name,
                        "unit did not finish after SIGKILL, aborting it"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
                report.forced.push(unit.spec.name.clone());
            }
        }

        for unit in &self.units {
            unit.publisher.halt();
        }

        info!(
            stopped = report.stopped.len(),
            forced = report.forced.len(),
            "shutdown complete"
        );
        self.shutdown_done.send_replace(true);

        report
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Aborting drops each unit's child handle, which kills the process
        for unit in &mut self.units {
            if let Some(handle) = unit.task.get_mut().take() {
                handle.abort();
            }
        }
    }
}

fn spawn_unit(
    spec: &Arc<ProcessSpec>,
    launcher: &Arc<dyn Launcher>,
    publisher: &StatePublisher,
    directive: watch::Receiver<Directive>,
    relaunch: bool,
) -> JoinHandle<()> {
    let span = info_span!("unit", process = %spec.name);
    let unit = MonitoringUnit::new(
        Arc::clone(spec),
        Arc::clone(launcher),
        publisher.clone(),
        directive,
    );
    tokio::spawn(unit.run(relaunch).instrument(span))
}
