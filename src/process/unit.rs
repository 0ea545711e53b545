use crate::process::restart::RestartPolicy;
use crate::process::spawner::{ChildProcess, Launcher};
use crate::process::spec::ProcessSpec;
use crate::process::types::{ExitResult, ProcessState, ProcessStatus, StatusEvent};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// What the supervisor wants a unit to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
    Run,
    /// Stop this unit only
    Stop,
    /// Stop as part of whole-system shutdown
    Shutdown,
    /// Shutdown without waiting for a graceful exit
    Kill,
}

impl Directive {
    pub(crate) fn is_stop(self) -> bool {
        !matches!(self, Directive::Run)
    }

    pub(crate) fn halts(self) -> bool {
        matches!(self, Directive::Shutdown | Directive::Kill)
    }
}

/// Publishes a unit's state and the matching transition events
#[derive(Clone)]
pub(crate) struct StatePublisher {
    state: Arc<watch::Sender<ProcessState>>,
    events: broadcast::Sender<StatusEvent>,
}

impl StatePublisher {
    pub(crate) fn new(
        state: Arc<watch::Sender<ProcessState>>,
        events: broadcast::Sender<StatusEvent>,
    ) -> Self {
        Self { state, events }
    }

    pub(crate) fn snapshot(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    /// Apply `update` and record the resulting status change
    pub(crate) fn transition<F>(&self, at: SystemTime, update: F)
    where
        F: FnOnce(&mut ProcessState),
    {
        let mut change = None;
        self.state.send_modify(|state| {
            let from = state.status;
            update(state);
            change = Some((state.name.clone(), from, state.status));
        });

        if let Some((name, from, to)) = change.filter(|(_, from, to)| from != to) {
            debug!(process = %name, %from, %to, "status transition");
            // No subscribers is fine
            let _ = self.events.send(StatusEvent { name, from, to, at });
        }
    }

    pub(crate) fn halt(&self) {
        if self.state.borrow().status != ProcessStatus::Halted {
            self.transition(SystemTime::now(), |s| {
                s.status = ProcessStatus::Halted;
                s.pid = None;
            });
        }
    }
}

/// The restart loop for one spec
pub(crate) struct MonitoringUnit {
    spec: Arc<ProcessSpec>,
    launcher: Arc<dyn Launcher>,
    policy: RestartPolicy,
    publisher: StatePublisher,
    directive: watch::Receiver<Directive>,
}

impl MonitoringUnit {
    pub(crate) fn new(
        spec: Arc<ProcessSpec>,
        launcher: Arc<dyn Launcher>,
        publisher: StatePublisher,
        directive: watch::Receiver<Directive>,
    ) -> Self {
        let policy = RestartPolicy::fixed(spec.restart_delay);
        Self {
            spec,
            launcher,
            policy,
            publisher,
            directive,
        }
    }

    fn current(&self) -> Directive {
        *self.directive.borrow()
    }

    /// Drive the unit until a stop is requested
    ///
    /// `relaunch` marks a manual start of a previously stopped unit, which
    /// counts as a restart.
    pub(crate) async fn run(mut self, mut relaunch: bool) {
        loop {
            if self.current().is_stop() {
                self.finish(None);
                return;
            }

            self.publisher
                .transition(SystemTime::now(), |s| s.mark_starting(relaunch));
            relaunch = true;

            let exit = match self.launcher.launch(&self.spec).await {
                Ok(mut child) => {
                    let pid = child.pid();
                    self.publisher
                        .transition(SystemTime::now(), |s| s.mark_running(pid, SystemTime::now()));
                    info!(pid = ?pid, command = %self.spec.command_line(), "process started");

                    self.supervise(child.as_mut()).await
                }
                Err(e) => {
                    warn!(error = %e, "failed to spawn process");
                    ExitResult::SpawnFailed(e.to_string())
                }
            };

            let exited_wall = SystemTime::now();
            let exited_at = Instant::now();

            if !self.policy.should_restart(self.current().is_stop()) {
                info!(exit = %exit, "process stopped");
                self.finish(Some((exit, exited_wall)));
                return;
            }

            warn!(
                exit = %exit,
                delay = ?self.policy.delay(),
                "process exited unexpectedly, scheduling restart"
            );
            self.publisher.transition(exited_wall, |s| {
                s.mark_exited(ProcessStatus::Crashed, exit, exited_wall)
            });
            self.publisher.transition(SystemTime::now(), |s| {
                s.status = ProcessStatus::Restarting
            });

            let resume_at = self.policy.resume_at(exited_at);
            tokio::select! {
                _ = tokio::time::sleep_until(resume_at.into()) => {}
                _ = wait_for_directive(&mut self.directive, Directive::is_stop) => {
                    debug!("restart cancelled by stop request");
                }
            }
        }
    }

    /// Wait for the child to exit, escalating a stop request when needed
    async fn supervise(&mut self, child: &mut dyn ChildProcess) -> ExitResult {
        tokio::select! {
            exit = child.wait() => return exit,
            _ = wait_for_directive(&mut self.directive, Directive::is_stop) => {}
        }

        if self.current() != Directive::Kill {
            info!(signal = %self.spec.stop_signal, "stop requested, signalling process");
            if let Err(e) = child.request_stop(self.spec.stop_signal) {
                error!(error = %e, "failed to signal process");
            }

            tokio::select! {
                exit = child.wait() => return exit,
                _ = tokio::time::sleep(self.spec.stop_timeout) => {
                    warn!(
                        timeout = ?self.spec.stop_timeout,
                        "process did not exit in time, sending SIGKILL"
                    );
                }
                _ = wait_for_directive(&mut self.directive, |d| d == Directive::Kill) => {
                    warn!("forced termination requested, sending SIGKILL");
                }
            }
        }

        if let Err(e) = child.kill().await {
            error!(error = %e, "failed to kill process");
        }

        child.wait().await
    }

    /// Settle into `Stopped`, or `Halted` when shutting down
    fn finish(&self, exit: Option<(ExitResult, SystemTime)>) {
        let at = SystemTime::now();
        self.publisher.transition(at, |s| match exit {
            Some((exit, exited_at)) => s.mark_exited(ProcessStatus::Stopped, exit, exited_at),
            None => {
                s.status = ProcessStatus::Stopped;
                s.pid = None;
            }
        });

        if self.current().halts() {
            self.publisher.halt();
        }
    }
}

/// Resolve once the published state satisfies `predicate`
pub(crate) async fn wait_for_state<F>(state: &mut watch::Receiver<ProcessState>, predicate: F)
where
    F: Fn(&ProcessState) -> bool,
{
    let closed = state.wait_for(|s| predicate(s)).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Resolve once the directive satisfies `predicate`
///
/// Never resolves if the supervisor side has gone away.
pub(crate) async fn wait_for_directive<F>(directive: &mut watch::Receiver<Directive>, predicate: F)
where
    F: Fn(Directive) -> bool,
{
    let closed = directive.wait_for(|d| predicate(*d)).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
