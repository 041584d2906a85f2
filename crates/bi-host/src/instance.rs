// SPDX-License-Identifier: MIT OR Apache-2.0
//! The [`Instance`] lifecycle manager.

use crate::error::InstanceError;
use crate::events::{EventBus, EventStream, InstanceEvent};
use crate::lifecycle::{LifecycleError, LifecycleManager, LifecycleState, LifecycleTransition};
use crate::process::{InstanceInfo, ProcessStatus};
use crate::strategy::{TerminationStrategy, select_termination_strategy, uses_transient_launcher};
use crate::system::{DirRemover, FsRemover, OSASCRIPT, OsCommands, SystemCommands, TASKKILL};
use bi_config::{LaunchConfig, Platform};
use chrono::{DateTime, Utc};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One-shot completion callback passed to [`Instance::stop_with`].
pub type StopCallback = Box<dyn FnOnce() + Send + 'static>;

/// A single externally launched process and its control handle.
///
/// `start` and `stop` return immediately; outcomes arrive on the event
/// channel ([`Instance::events`]) and through stop callbacks. Both must be
/// called from within a Tokio runtime.
pub struct Instance {
    config: Arc<LaunchConfig>,
    platform: Platform,
    commands: Arc<dyn SystemCommands>,
    inner: Arc<Inner>,
    capture_output: bool,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

/// Builder for [`Instance`] with substitutable collaborators.
pub struct InstanceBuilder {
    config: LaunchConfig,
    platform: Platform,
    commands: Arc<dyn SystemCommands>,
    remover: Arc<dyn DirRemover>,
    capture_output: bool,
}

impl InstanceBuilder {
    /// Platform whose termination policy applies. Defaults to the host.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Provider of `taskkill`/`osascript`. Defaults to [`OsCommands`].
    pub fn commands(mut self, commands: Arc<dyn SystemCommands>) -> Self {
        self.commands = commands;
        self
    }

    /// Temporary-directory removal. Defaults to [`FsRemover`].
    pub fn remover(mut self, remover: Arc<dyn DirRemover>) -> Self {
        self.remover = remover;
        self
    }

    /// Pipe stdout/stderr back to the caller (the default). When `false`
    /// both are sent to the null device and `take_stdout`/`take_stderr`
    /// return `None`.
    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Build the instance in the `created` state.
    pub fn build(self) -> Instance {
        let (stopped, _) = watch::channel(false);
        let inner = Inner {
            id: Uuid::new_v4(),
            shared: Mutex::new(Shared::default()),
            events: EventBus::new(),
            stopped,
            temp_dir: self.config.temp_dir.clone(),
            remover: self.remover,
        };
        Instance {
            config: Arc::new(self.config),
            platform: self.platform,
            commands: self.commands,
            inner: Arc::new(inner),
            capture_output: self.capture_output,
            stdout: None,
            stderr: None,
        }
    }
}

struct Inner {
    id: Uuid,
    shared: Mutex<Shared>,
    events: EventBus,
    stopped: watch::Sender<bool>,
    temp_dir: Option<PathBuf>,
    remover: Arc<dyn DirRemover>,
}

struct Shared {
    lifecycle: LifecycleManager,
    status: ProcessStatus,
    pid: Option<u32>,
    stop_strategy: Option<TerminationStrategy>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    callbacks: Vec<StopCallback>,
    kill_tx: Option<mpsc::UnboundedSender<()>>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleManager::new(),
            status: ProcessStatus::NotStarted,
            pid: None,
            stop_strategy: None,
            started_at: None,
            ended_at: None,
            callbacks: Vec::new(),
            kill_tx: None,
        }
    }
}

enum StopAction {
    KillImage(String),
    Quit(String),
    Signal(mpsc::UnboundedSender<()>),
}

impl Instance {
    /// Create an instance for `config` with the default collaborators.
    pub fn new(config: LaunchConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start configuring an instance for `config`.
    pub fn builder(config: LaunchConfig) -> InstanceBuilder {
        InstanceBuilder {
            config,
            platform: Platform::current(),
            commands: Arc::new(OsCommands),
            remover: Arc::new(FsRemover),
            capture_output: true,
        }
    }

    /// Unique id of this instance, used in log records.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The launch configuration.
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Platform whose termination policy applies.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lock().lifecycle.state()
    }

    /// Process id while the process is believed to be alive.
    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().status.pid()
    }

    /// Snapshot of state, status and timestamps.
    pub fn info(&self) -> InstanceInfo {
        let shared = self.inner.lock();
        InstanceInfo {
            id: self.inner.id,
            state: shared.lifecycle.state(),
            status: shared.status.clone(),
            pid: shared.pid,
            stop_strategy: shared.stop_strategy,
            started_at: shared.started_at,
            ended_at: shared.ended_at,
        }
    }

    /// Lifecycle transitions so far.
    pub fn history(&self) -> Vec<LifecycleTransition> {
        self.inner.lock().lifecycle.history().to_vec()
    }

    /// Take the process's stdout pipe. `None` before `start` or once taken.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take the process's stderr pipe. `None` before `start` or once taken.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Stream of events emitted from now on.
    pub fn events(&self) -> EventStream {
        self.inner.events.stream()
    }

    /// Raw receiver of events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.inner.events.subscribe()
    }

    /// Resolves once the `stop` event has fired.
    pub async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Spawn the process.
    ///
    /// A second call fails with [`InstanceError::DoubleStart`]. Spawn
    /// failures are not returned: they are published as an `error` event,
    /// followed by `stop`.
    ///
    /// With output capture on (the default), stdout and stderr are pipes of
    /// bounded capacity: take both and keep reading them, or a chatty process
    /// blocks once a pipe fills. Use [`InstanceBuilder::capture_output`] to
    /// discard output instead.
    pub fn start(&mut self) -> Result<(), InstanceError> {
        {
            let mut shared = self.inner.lock();
            if let Err(e) = shared
                .lifecycle
                .transition(LifecycleState::Running, Some("start".into()))
            {
                let state = match e {
                    LifecycleError::AlreadyInState(s) => s,
                    LifecycleError::InvalidTransition { from, .. } => from,
                };
                return Err(InstanceError::DoubleStart { state });
            }
            shared.started_at = Some(Utc::now());
        }

        let mut child = match self.command().spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = InstanceError::Spawn {
                    command: self.config.command.clone(),
                    source,
                };
                warn!(target: "bi.instance", id = %self.inner.id, "{err}");
                self.inner.emit_error(err);
                self.inner.finish(ProcessStatus::SpawnFailed, "spawn failed");
                return Ok(());
            }
        };

        // `id()` is only `None` once the child has been reaped.
        let pid = child.id().unwrap_or_default();
        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take();

        let mut shared = self.inner.lock();
        shared.pid = Some(pid);

        if uses_transient_launcher(&self.config, self.platform) {
            shared.status = ProcessStatus::HandedOff { pid };
            info!(
                target: "bi.instance",
                id = %self.inner.id,
                pid,
                "started transient launcher; exit will not be observed"
            );
            return Ok(());
        }

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        shared.kill_tx = Some(kill_tx);
        shared.status = ProcessStatus::Running { pid };
        drop(shared);

        info!(
            target: "bi.instance",
            id = %self.inner.id,
            pid,
            command = %self.config.command,
            "instance started"
        );
        tokio::spawn(watch_exit(Arc::clone(&self.inner), child, kill_rx));
        Ok(())
    }

    /// Request termination.
    ///
    /// Fails with [`InstanceError::NotRunning`] before `start`, or when the
    /// direct-kill strategy applies but no process handle is held (transient
    /// launchers). On an already stopped instance this is a no-op.
    pub fn stop(&self) -> Result<(), InstanceError> {
        self.request_stop(None)
    }

    /// Like [`Instance::stop`], registering `on_stopped` to run once when the
    /// `stop` event fires.
    ///
    /// Callbacks run in registration order. If the instance has already
    /// stopped, or the call fails, `on_stopped` is dropped without running.
    pub fn stop_with<F>(&self, on_stopped: F) -> Result<(), InstanceError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.request_stop(Some(Box::new(on_stopped)))
    }

    fn request_stop(&self, on_stopped: Option<StopCallback>) -> Result<(), InstanceError> {
        let strategy = select_termination_strategy(&self.config, self.platform);

        let mut shared = self.inner.lock();
        match shared.lifecycle.state() {
            LifecycleState::Created => return Err(InstanceError::NotRunning),
            LifecycleState::Stopped => {
                debug!(target: "bi.instance", id = %self.inner.id, "stop ignored: already stopped");
                return Ok(());
            }
            LifecycleState::Running => {}
        }

        let action = match strategy {
            // Selected only when an image name is configured.
            TerminationStrategy::ImageKill => {
                StopAction::KillImage(self.config.image.clone().unwrap_or_default())
            }
            TerminationStrategy::NamedQuit => match self.config.process_name.clone() {
                Some(name) => StopAction::Quit(name),
                None => return Err(InstanceError::MissingProcessName),
            },
            TerminationStrategy::DirectKill => match shared.kill_tx.clone() {
                Some(tx) => StopAction::Signal(tx),
                None => return Err(InstanceError::NotRunning),
            },
        };

        if let Some(cb) = on_stopped {
            shared.callbacks.push(cb);
        }
        shared.stop_strategy.get_or_insert(strategy);
        drop(shared);

        info!(target: "bi.instance", id = %self.inner.id, %strategy, "stopping instance");

        match action {
            StopAction::KillImage(image) => {
                let inner = Arc::clone(&self.inner);
                let commands = Arc::clone(&self.commands);
                tokio::spawn(async move {
                    match commands.kill_image(&image).await {
                        Ok(code) => {
                            if code != Some(0) {
                                debug!(
                                    target: "bi.instance.system",
                                    id = %inner.id,
                                    ?code,
                                    "{TASKKILL} exited unsuccessfully"
                                );
                            }
                            inner.finish(
                                ProcessStatus::Terminated {
                                    strategy: TerminationStrategy::ImageKill,
                                },
                                "image kill completed",
                            );
                        }
                        Err(source) => inner.emit_error(InstanceError::TerminationCommand {
                            command: TASKKILL.into(),
                            source,
                        }),
                    }
                });
            }
            StopAction::Quit(name) => {
                let inner = Arc::clone(&self.inner);
                let commands = Arc::clone(&self.commands);
                tokio::spawn(async move {
                    if let Err(source) = commands.quit_application(&name).await {
                        inner.emit_error(InstanceError::TerminationCommand {
                            command: OSASCRIPT.into(),
                            source,
                        });
                    }
                });
            }
            StopAction::Signal(tx) => {
                // A closed channel means the exit observer already saw the exit.
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    fn command(&self) -> Command {
        let cfg = &self.config;
        let mut cmd = Command::new(&cfg.command);
        cmd.args(&cfg.args).stdin(Stdio::null());
        if self.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        if let Some(cwd) = &cfg.cwd {
            cmd.current_dir(cwd);
        }
        if !cfg.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&cfg.env);
        if cfg.detached {
            detach(&mut cmd);
        }
        cmd
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.inner.id)
            .field("command", &self.config.command)
            .field("platform", &self.platform)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("instance lock poisoned")
    }

    fn emit_error(&self, err: InstanceError) {
        debug!(target: "bi.instance", id = %self.id, kind = %err.kind(), "{err}");
        self.events.emit(InstanceEvent::Error(Arc::new(err)));
    }

    /// Status to record when the owned process exits.
    ///
    /// An exit only counts as a termination when our signal was delivered,
    /// or when a stop was requested and the process died without an exit
    /// code. A process that exits normally after a quit request that went
    /// nowhere is reported as `Exited`.
    fn exit_status(&self, code: Option<i32>, signalled: bool) -> ProcessStatus {
        if signalled {
            return ProcessStatus::Terminated {
                strategy: TerminationStrategy::DirectKill,
            };
        }
        match (self.lock().stop_strategy, code) {
            (Some(strategy), None) => ProcessStatus::Terminated { strategy },
            _ => ProcessStatus::Exited { code },
        }
    }

    /// Move to `stopped` and fire the `stop` event, once.
    fn finish(&self, status: ProcessStatus, reason: &str) {
        let callbacks = {
            let mut shared = self.lock();
            if shared
                .lifecycle
                .transition(LifecycleState::Stopped, Some(reason.to_string()))
                .is_err()
            {
                return;
            }
            shared.status = status;
            shared.ended_at = Some(Utc::now());
            shared.kill_tx = None;
            std::mem::take(&mut shared.callbacks)
        };

        info!(target: "bi.instance", id = %self.id, reason, "instance stopped");
        self.events.emit(InstanceEvent::Stop);
        // Waiters and cleanup must not depend on callbacks returning.
        self.stopped.send_replace(true);
        self.schedule_cleanup();
        for cb in callbacks {
            cb();
        }
    }

    /// Fire-and-forget removal of the temp dir; the outcome is only logged.
    fn schedule_cleanup(&self) {
        let Some(dir) = self.temp_dir.clone() else {
            return;
        };
        let remover = Arc::clone(&self.remover);
        let id = self.id;
        tokio::spawn(async move {
            match remover.remove_dir_all(&dir).await {
                Ok(()) => {
                    debug!(target: "bi.instance.cleanup", %id, dir = %dir.display(), "temp dir removed");
                }
                Err(source) => {
                    let err = InstanceError::Cleanup { path: dir, source };
                    debug!(target: "bi.instance.cleanup", %id, kind = %err.kind(), "{err}");
                }
            }
        });
    }
}

/// Exit observer: owns the child, forwards kill requests, and fires `stop`
/// once the OS reports the exit.
async fn watch_exit(inner: Arc<Inner>, mut child: Child, mut kill_rx: mpsc::UnboundedReceiver<()>) {
    let pid = child.id().unwrap_or_default();
    let mut accepting = true;
    let mut signalled = false;

    let result = loop {
        tokio::select! {
            status = child.wait() => break status,
            req = kill_rx.recv(), if accepting => match req {
                Some(()) => match terminate(&mut child) {
                    Ok(()) => signalled = true,
                    Err(source) => inner.emit_error(InstanceError::Kill { pid, source }),
                },
                None => accepting = false,
            },
        }
    };

    match result {
        Ok(status) => {
            debug!(target: "bi.instance", id = %inner.id, pid, %status, "process exited");
            let status = inner.exit_status(status.code(), signalled);
            inner.finish(status, "process exited");
        }
        Err(source) => {
            inner.emit_error(InstanceError::Wait { pid, source });
            inner.finish(ProcessStatus::Exited { code: None }, "wait failed");
        }
    }
}

/// Ask the child to terminate: `SIGTERM` on Unix, the runtime kill elsewhere.
#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}
