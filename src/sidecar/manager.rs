//! Sidecar process supervision.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, watch};

use crate::config::{SupervisorConfig, inject_env_if_absent};
use crate::sidecar::command::build_launch_args;
use crate::sidecar::config::{RuntimeConfig, SidecarOptions};
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::heartbeat::{HeartbeatOutcome, HeartbeatTask};
use crate::sidecar::inventory::{CliInventory, Inventory};
use crate::sidecar::output::{OutputSink, TracingSink, classify_stderr, classify_stdout};
use crate::sidecar::process::{
    LaunchRequest, OutputEvent, ProcessControl, ProcessHandle, SystemProcessControl,
};

/// Name under which the sidecar's HTTP port is published once known.
pub const HTTP_PORT_ENV: &str = "SIDECAR_HTTP_PORT";
/// Name under which the sidecar's gRPC port is published once known.
pub const GRPC_PORT_ENV: &str = "SIDECAR_GRPC_PORT";

/// Lifecycle status of the supervised sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarStatus {
    Starting,
    /// The process was launched and its output is being captured.
    Started,
    Stopping,
    Stopped,
    Restarting,
}

impl SidecarStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SidecarStatus::Starting => "starting",
            SidecarStatus::Started => "started",
            SidecarStatus::Stopping => "stopping",
            SidecarStatus::Stopped => "stopped",
            SidecarStatus::Restarting => "restarting",
        }
    }
}

impl fmt::Display for SidecarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of backfilling the sidecar ports after the first output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCompletion {
    /// Both ports were already declared.
    AlreadyComplete,
    /// The inventory reported both ports.
    Completed { http_port: u16, grpc_port: u16 },
    /// The inventory never reported the instance; ports stay unset.
    Exhausted { attempts: u32 },
    /// The launch this output belongs to is no longer current.
    Skipped,
}

/// External collaborators the supervisor drives.
pub struct Collaborators {
    pub inventory: Arc<dyn Inventory>,
    pub process: Arc<dyn ProcessControl>,
    pub output: Arc<dyn OutputSink>,
}

impl Collaborators {
    /// The sidecar CLI inventory, OS process control and `tracing` output.
    pub fn system(config: &SupervisorConfig) -> Self {
        Self {
            inventory: Arc::new(CliInventory::new(
                config.executable.clone(),
                config.inventory_timeout(),
            )),
            process: Arc::new(SystemProcessControl::new()),
            output: Arc::new(TracingSink),
        }
    }
}

/// Supervises a single sidecar process.
///
/// Launches the sidecar, keeps the applied configuration (app id and ports)
/// consistent across restarts, evicts whatever holds the sidecar's ports,
/// and restarts the sidecar from a heartbeat when the inventory loses it.
/// `start`, `refresh`, `stop`, `dispose` and heartbeat ticks are serialized
/// behind one lock, so at most one lifecycle operation runs at a time.
pub struct SidecarManager {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: SupervisorConfig,
    inventory: Arc<dyn Inventory>,
    process: Arc<dyn ProcessControl>,
    output: Arc<dyn OutputSink>,
    state: Mutex<SupervisorState>,
    status: watch::Sender<SidecarStatus>,
    /// Bumped on every launch; output consumers of older launches go inert.
    generation: AtomicU64,
}

#[derive(Default)]
struct SupervisorState {
    process: Option<ProcessHandle>,
    /// Configuration of the first successful launch since the last refresh.
    applied: Option<RuntimeConfig>,
    heartbeat: Option<HeartbeatTask>,
    disposed: bool,
}

impl SidecarManager {
    /// Create a supervisor using the real inventory and process control.
    pub fn new(config: SupervisorConfig) -> Self {
        let collaborators = Collaborators::system(&config);
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: SupervisorConfig, collaborators: Collaborators) -> Self {
        let (status, _) = watch::channel(SidecarStatus::Stopped);
        Self {
            inner: Arc::new(Inner {
                config,
                inventory: collaborators.inventory,
                process: collaborators.process,
                output: collaborators.output,
                state: Mutex::new(SupervisorState::default()),
                status,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SidecarStatus {
        *self.inner.status.borrow()
    }

    /// Watch status transitions. Same-state transitions are not reported.
    pub fn subscribe_status(&self) -> watch::Receiver<SidecarStatus> {
        self.inner.status.subscribe()
    }

    /// The applied configuration, including any backfilled ports.
    pub async fn applied_config(&self) -> Option<RuntimeConfig> {
        self.inner.state.lock().await.applied.clone()
    }

    /// Pid of the tracked sidecar process.
    pub async fn process_id(&self) -> Option<u32> {
        self.inner
            .state
            .lock()
            .await
            .process
            .as_ref()
            .map(ProcessHandle::pid)
    }

    /// Normalize `options` and launch the sidecar.
    ///
    /// Any earlier instance of the same app id and any process holding a
    /// declared sidecar port is killed first. Configuration errors are
    /// returned before any process is touched.
    pub async fn start(&self, options: &SidecarOptions) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(SidecarError::Disposed);
        }
        let config = options.normalize()?;
        self.inner.start_sequence(&mut state, config).await
    }

    /// Replace the running sidecar with one built from `options`.
    ///
    /// Fails with [`SidecarError::NotStarted`] unless a start has succeeded.
    pub async fn refresh(&self, options: &SidecarOptions) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(SidecarError::Disposed);
        }
        let Some(previous) = state.applied.clone() else {
            return Err(SidecarError::NotStarted);
        };
        let config = options.normalize()?;

        tracing::info!(
            "Refreshing sidecar {} as {}",
            previous.app_id,
            config.app_id
        );
        self.inner.set_status(SidecarStatus::Restarting);
        self.inner.stop_sequence(&mut state, Some(&previous)).await;
        state.applied = None;
        state.process = None;

        self.inner.start_sequence(&mut state, config).await
    }

    /// Stop the sidecar. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return;
        }
        self.inner.stop_locked(&mut state).await;
    }

    /// Run one heartbeat check now.
    pub async fn check_heartbeat(&self) -> HeartbeatOutcome {
        self.inner.heartbeat_tick().await
    }

    /// Stop the sidecar and cancel the heartbeat. Later lifecycle calls fail
    /// with [`SidecarError::Disposed`].
    pub async fn dispose(&self) {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return;
        }
        self.inner.stop_locked(&mut state).await;
        if let Some(heartbeat) = state.heartbeat.take() {
            heartbeat.cancel();
        }
        state.disposed = true;
        tracing::debug!("Sidecar supervisor disposed");
    }
}

impl Drop for SidecarManager {
    fn drop(&mut self) {
        if let Ok(state) = self.inner.state.try_lock()
            && !state.disposed
            && let Some(process) = state.process.as_ref()
            && !process.has_exited()
        {
            tracing::warn!(
                "SidecarManager dropped without dispose(), sidecar process {} may remain running",
                process.pid()
            );
        }
    }
}

impl Inner {
    pub(crate) fn status(&self) -> SidecarStatus {
        *self.status.borrow()
    }

    fn set_status(&self, next: SidecarStatus) {
        let mut previous = next;
        let changed = self.status.send_if_modified(|status| {
            previous = *status;
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
        if changed {
            tracing::debug!(from = %previous, to = %next, "Sidecar status changed");
        }
    }

    async fn stop_locked(&self, state: &mut SupervisorState) {
        let applied = state.applied.clone();
        self.set_status(SidecarStatus::Stopping);
        self.stop_sequence(state, applied.as_ref()).await;
        self.set_status(SidecarStatus::Stopped);
    }

    /// Launch the sidecar for `config`. Caller holds the state lock.
    async fn start_sequence(
        self: &Arc<Self>,
        state: &mut SupervisorState,
        config: RuntimeConfig,
    ) -> Result<()> {
        self.set_status(SidecarStatus::Starting);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let command = build_launch_args(&config, &self.config.run_command, &self.config.flag_prefix);

        // With nothing applied yet, clear out stale instances and port
        // holders for the configuration about to launch.
        let previous = state.applied.clone().unwrap_or_else(|| config.clone());
        self.stop_sequence(state, Some(&previous)).await;

        tracing::info!(
            "Starting sidecar {}: {} {}",
            config.app_id,
            self.config.executable,
            command.render()
        );
        let launched = match self
            .process
            .launch(&LaunchRequest {
                executable: self.config.executable.clone(),
                args: command.into_args(),
                visible: config.visible,
            })
            .await
        {
            Ok(launched) => launched,
            Err(e) => {
                self.set_status(SidecarStatus::Stopped);
                return Err(e);
            }
        };

        let pid = launched.handle.pid();
        self.spawn_output_consumer(generation, launched.events);
        state.process = Some(launched.handle);

        if config.heartbeat.enabled && state.heartbeat.is_none() {
            state.heartbeat = Some(HeartbeatTask::spawn(
                Arc::downgrade(self),
                config.heartbeat.interval(),
            ));
        }

        let app_id = config.app_id.clone();
        if state.applied.is_none() {
            state.applied = Some(config);
        }

        self.set_status(SidecarStatus::Started);
        tracing::info!("Sidecar {} started (pid {})", app_id, pid);

        // An exit reported before `Started` was published went unhandled.
        if state.process.as_ref().is_some_and(ProcessHandle::has_exited) {
            tracing::warn!("Sidecar {} (pid {}) exited during startup", app_id, pid);
            self.set_status(SidecarStatus::Stopped);
        }
        Ok(())
    }

    /// Stop the tracked process, every inventory instance of the app id,
    /// and whatever holds a declared port. Caller holds the state lock.
    async fn stop_sequence(&self, state: &mut SupervisorState, config: Option<&RuntimeConfig>) {
        if let Some(handle) = state.process.take() {
            self.stop_tracked(&handle).await;
        }

        let Some(config) = config else {
            return;
        };

        for instance in self.inventory.list(&config.app_id).await {
            match self.process.find_process(instance.pid).await {
                Some(info) => {
                    tracing::info!(
                        "Stopping sidecar instance {} (pid {}, {})",
                        instance.app_id,
                        info.pid,
                        info.name
                    );
                    if !self.process.kill(info.pid).await {
                        tracing::warn!("Failed to kill sidecar instance pid {}", info.pid);
                    }
                }
                None => {
                    tracing::debug!("Sidecar instance pid {} already gone", instance.pid);
                }
            }
        }

        for port in config.declared_ports() {
            self.evict_port(port).await;
        }
    }

    /// Terminate the tracked process, escalating to a kill after the grace
    /// period.
    async fn stop_tracked(&self, handle: &ProcessHandle) {
        if handle.has_exited() {
            return;
        }

        let pid = handle.pid();
        let grace = self.config.stop_grace();

        if !self.process.terminate(pid).await {
            tracing::debug!("No terminate signal delivered to sidecar pid {}", pid);
        }
        if self.process.wait_for_exit(handle, grace).await {
            return;
        }

        tracing::warn!(
            "Sidecar pid {} did not exit within {:?}, killing it",
            pid,
            grace
        );
        self.process.kill(pid).await;
        if !self.process.wait_for_exit(handle, grace).await {
            tracing::warn!("Sidecar pid {} still running after kill, abandoning it", pid);
        }
    }

    async fn evict_port(&self, port: u16) {
        if self.process.is_port_free(port).await {
            return;
        }

        for pid in self.process.pids_on_port(port).await {
            let name = self
                .process
                .find_process(pid)
                .await
                .map(|info| info.name)
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(port, pid, process = %name, "Killing process holding sidecar port");
            if !self.process.kill(pid).await {
                tracing::warn!("Failed to kill pid {} on port {}", pid, port);
            }
        }
    }

    fn spawn_output_consumer(
        self: &Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<OutputEvent>,
    ) {
        let inner = Arc::downgrade(self);
        let output = Arc::clone(&self.output);

        tokio::spawn(async move {
            let mut first_output_seen = false;

            while let Some(event) = events.recv().await {
                let line = match &event {
                    OutputEvent::Stdout(text) => classify_stdout(Some(text.as_str())),
                    OutputEvent::Stderr(text) => classify_stderr(Some(text.as_str())),
                    OutputEvent::Exited(code) => {
                        if let Some(inner) = inner.upgrade() {
                            inner.on_exit(generation, *code);
                        }
                        break;
                    }
                };

                if !first_output_seen {
                    first_output_seen = true;
                    if let Some(inner) = inner.upgrade() {
                        inner.complete_ports(generation).await;
                    }
                }

                if let Some(line) = line {
                    output.emit(&line);
                }
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Fill in sidecar ports the configuration left unset, from the
    /// inventory, and publish them.
    pub(crate) async fn complete_ports(&self, generation: u64) -> PortCompletion {
        let mut state = self.state.lock().await;
        if !self.is_current(generation) {
            return PortCompletion::Skipped;
        }
        let Some(applied) = state.applied.as_mut() else {
            return PortCompletion::Skipped;
        };
        if applied.ports_complete() {
            return PortCompletion::AlreadyComplete;
        }

        let app_id = applied.app_id.clone();
        let attempts = self.config.port_poll_attempts;
        let delay = self.config.port_poll_delay();

        for attempt in 1..=attempts {
            let found = self
                .inventory
                .list(&app_id)
                .await
                .into_iter()
                .find_map(|instance| Some((instance.http_port?, instance.grpc_port?)));

            if let Some((http_port, grpc_port)) = found {
                applied.http_port = Some(http_port);
                applied.grpc_port = Some(grpc_port);
                inject_env_if_absent(HTTP_PORT_ENV, &http_port.to_string());
                inject_env_if_absent(GRPC_PORT_ENV, &grpc_port.to_string());
                tracing::info!(
                    "Sidecar {} listening on http {} / grpc {}",
                    app_id,
                    http_port,
                    grpc_port
                );
                return PortCompletion::Completed {
                    http_port,
                    grpc_port,
                };
            }

            tracing::debug!(attempt, "Sidecar {} not in inventory yet", app_id);
            if attempt < attempts && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(
            "Could not discover ports for sidecar {} after {} inventory polls",
            app_id,
            attempts
        );
        PortCompletion::Exhausted { attempts }
    }

    fn on_exit(&self, generation: u64, code: Option<i32>) {
        if !self.is_current(generation) {
            tracing::debug!("Superseded sidecar process exited with {:?}", code);
            return;
        }
        tracing::info!("Sidecar process exited with code {:?}", code);

        // Lifecycle operations in flight own the status.
        let changed = self.status.send_if_modified(|status| {
            if *status == SidecarStatus::Started {
                *status = SidecarStatus::Stopped;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(from = %SidecarStatus::Started, to = %SidecarStatus::Stopped, "Sidecar status changed");
        }
    }

    /// One heartbeat: restart the sidecar if the inventory lost it.
    pub(crate) async fn heartbeat_tick(self: &Arc<Self>) -> HeartbeatOutcome {
        let mut state = self.state.lock().await;
        if state.disposed {
            return HeartbeatOutcome::NotConfigured;
        }
        let Some(applied) = state.applied.clone() else {
            return HeartbeatOutcome::NotConfigured;
        };

        if self.inventory.exists(&applied.app_id).await {
            tracing::debug!("Heartbeat: sidecar {} is running", applied.app_id);
            return HeartbeatOutcome::Healthy;
        }

        match self.status() {
            SidecarStatus::Started | SidecarStatus::Stopped => {
                tracing::warn!(
                    "Heartbeat: sidecar {} is not running, restarting",
                    applied.app_id
                );
                match self.start_sequence(&mut state, applied).await {
                    Ok(()) => HeartbeatOutcome::Restarted,
                    Err(e) => {
                        tracing::error!("Heartbeat restart failed: {}", e);
                        HeartbeatOutcome::RestartFailed
                    }
                }
            }
            status => {
                tracing::warn!(
                    "Heartbeat: sidecar {} is {}, skipping this check",
                    applied.app_id,
                    status
                );
                HeartbeatOutcome::InFlight(status)
            }
        }
    }
}
