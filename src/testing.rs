//! Test doubles for driving [`SidecarManager`] without real processes.
//!
//! Provides:
//! - [`FakeInventory`]: A scripted inventory that counts its polls
//! - [`FakeProcessControl`]: Launches fake children whose output and exit
//!   the test controls, and simulates processes holding ports
//! - [`RecordingSink`]: Collects classified output lines
//! - [`LogCapture`]: Collects formatted `tracing` events for the current thread
//! - [`TestHarness`]: A supervisor wired to all three, sharing one [`CallLog`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use sidecar_supervisor::config::SupervisorConfig;
//! use sidecar_supervisor::testing::TestHarness;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::new(SupervisorConfig::default());
//!     // drive harness.manager, inspect harness.process, harness.log, ...
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::SupervisorConfig;
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::inventory::{Inventory, RuntimeInstance};
use crate::sidecar::manager::{Collaborators, SidecarManager};
use crate::sidecar::output::{OutputLine, OutputSink};
use crate::sidecar::process::{
    ExitState, LaunchRequest, LaunchedProcess, OutputEvent, ProcessControl, ProcessHandle,
    ProcessInfo,
};

/// First pid handed out by [`FakeProcessControl`].
pub const FIRST_FAKE_PID: u32 = 1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Ordered record of collaborator calls, e.g. `"terminate 1000"`.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.entries).iter().position(|e| e == entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

/// Inventory returning whatever instances the test sets.
pub struct FakeInventory {
    instances: Mutex<Vec<RuntimeInstance>>,
    list_calls: AtomicU32,
    log: CallLog,
}

impl FakeInventory {
    pub fn new(log: CallLog) -> Self {
        Self {
            instances: Mutex::new(Vec::new()),
            list_calls: AtomicU32::new(0),
            log,
        }
    }

    pub fn set_instances(&self, instances: Vec<RuntimeInstance>) {
        *lock(&self.instances) = instances;
    }

    /// Report a running instance with both ports known.
    pub fn add_running(&self, app_id: &str, pid: u32, http_port: u16, grpc_port: u16) {
        lock(&self.instances).push(RuntimeInstance {
            app_id: app_id.to_string(),
            pid,
            http_port: Some(http_port),
            grpc_port: Some(grpc_port),
        });
    }

    pub fn clear(&self) {
        lock(&self.instances).clear();
    }

    /// Number of `list` calls so far.
    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn list(&self, app_id: &str) -> Vec<RuntimeInstance> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("list {app_id}"));
        lock(&self.instances)
            .iter()
            .filter(|instance| instance.app_id == app_id)
            .cloned()
            .collect()
    }
}

struct FakeChild {
    name: String,
    events: mpsc::UnboundedSender<OutputEvent>,
    exit: watch::Sender<Option<ExitState>>,
}

impl FakeChild {
    fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    fn finish(&self, code: Option<i32>) {
        if self.is_running() {
            self.exit.send_replace(Some(ExitState { code }));
            let _ = self.events.send(OutputEvent::Exited(code));
        }
    }
}

/// Process control over simulated processes.
///
/// Launched children run until terminated, killed, or finished with
/// [`exit`](Self::exit). Unrelated processes can be registered with
/// [`add_process`](Self::add_process) and bound to ports with
/// [`occupy_port`](Self::occupy_port).
pub struct FakeProcessControl {
    log: CallLog,
    next_pid: AtomicU32,
    pending_failures: AtomicU32,
    ignore_terminate: AtomicBool,
    exit_on_launch: AtomicBool,
    children: Mutex<HashMap<u32, FakeChild>>,
    processes: Mutex<HashMap<u32, String>>,
    ports: Mutex<HashMap<u16, Vec<u32>>>,
    launches: Mutex<Vec<LaunchRequest>>,
    kills: Mutex<Vec<u32>>,
}

impl FakeProcessControl {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            next_pid: AtomicU32::new(FIRST_FAKE_PID),
            pending_failures: AtomicU32::new(0),
            ignore_terminate: AtomicBool::new(false),
            exit_on_launch: AtomicBool::new(false),
            children: Mutex::new(HashMap::new()),
            processes: Mutex::new(HashMap::new()),
            ports: Mutex::new(HashMap::new()),
            launches: Mutex::new(Vec::new()),
            kills: Mutex::new(Vec::new()),
        }
    }

    /// Make the next launch fail.
    pub fn fail_next_launch(&self) {
        self.pending_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Launched children ignore terminate requests and only die on kill.
    pub fn set_ignore_terminate(&self, ignore: bool) {
        self.ignore_terminate.store(ignore, Ordering::SeqCst);
    }

    /// Launched children exit with code 1 before `launch` returns.
    pub fn set_exit_on_launch(&self, exit: bool) {
        self.exit_on_launch.store(exit, Ordering::SeqCst);
    }

    /// Register an unrelated running process.
    pub fn add_process(&self, pid: u32, name: &str) {
        lock(&self.processes).insert(pid, name.to_string());
    }

    /// Register a process and bind it to `port`.
    pub fn occupy_port(&self, port: u16, pid: u32, name: &str) {
        self.add_process(pid, name);
        lock(&self.ports).entry(port).or_default().push(pid);
    }

    /// Emit a standard output line from a launched child.
    pub fn emit_stdout(&self, pid: u32, line: &str) {
        self.emit(pid, OutputEvent::Stdout(line.to_string()));
    }

    /// Emit a standard error line from a launched child.
    pub fn emit_stderr(&self, pid: u32, line: &str) {
        self.emit(pid, OutputEvent::Stderr(line.to_string()));
    }

    fn emit(&self, pid: u32, event: OutputEvent) {
        if let Some(child) = lock(&self.children).get(&pid) {
            let _ = child.events.send(event);
        }
    }

    /// Make a launched child exit on its own.
    pub fn exit(&self, pid: u32, code: Option<i32>) {
        if let Some(child) = lock(&self.children).get(&pid) {
            child.finish(code);
        }
    }

    pub fn is_running(&self, pid: u32) -> bool {
        lock(&self.children)
            .get(&pid)
            .map(FakeChild::is_running)
            .unwrap_or_else(|| lock(&self.processes).contains_key(&pid))
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        lock(&self.launches).clone()
    }

    pub fn launch_count(&self) -> usize {
        lock(&self.launches).len()
    }

    /// Pid of the most recently launched child.
    pub fn last_pid(&self) -> Option<u32> {
        let next = self.next_pid.load(Ordering::SeqCst);
        (next > FIRST_FAKE_PID).then(|| next - 1)
    }

    /// Pids passed to `kill`, in order.
    pub fn kills(&self) -> Vec<u32> {
        lock(&self.kills).clone()
    }

    fn remove_process(&self, pid: u32) -> bool {
        let removed = lock(&self.processes).remove(&pid).is_some();
        if removed {
            for holders in lock(&self.ports).values_mut() {
                holders.retain(|holder| *holder != pid);
            }
        }
        removed
    }
}

#[async_trait]
impl ProcessControl for FakeProcessControl {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess> {
        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.log.record("launch failed");
            return Err(SidecarError::LaunchFailed {
                executable: request.executable.clone(),
                reason: "scripted failure".to_string(),
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let child = FakeChild {
            name: request.executable.clone(),
            events: events_tx,
            exit: exit_tx,
        };
        if self.exit_on_launch.load(Ordering::SeqCst) {
            child.finish(Some(1));
        }
        lock(&self.children).insert(pid, child);
        lock(&self.launches).push(request.clone());
        self.log.record(format!("launch {pid}"));

        Ok(LaunchedProcess {
            handle: ProcessHandle::new(pid, exit_rx),
            events,
        })
    }

    async fn find_process(&self, pid: u32) -> Option<ProcessInfo> {
        if let Some(child) = lock(&self.children).get(&pid) {
            return child.is_running().then(|| ProcessInfo {
                pid,
                name: child.name.clone(),
            });
        }
        lock(&self.processes).get(&pid).map(|name| ProcessInfo {
            pid,
            name: name.clone(),
        })
    }

    async fn terminate(&self, pid: u32) -> bool {
        self.log.record(format!("terminate {pid}"));
        let ignore = self.ignore_terminate.load(Ordering::SeqCst);
        match lock(&self.children).get(&pid) {
            Some(child) if child.is_running() => {
                if !ignore {
                    child.finish(Some(0));
                }
                true
            }
            _ => false,
        }
    }

    async fn kill(&self, pid: u32) -> bool {
        self.log.record(format!("kill {pid}"));
        lock(&self.kills).push(pid);
        if let Some(child) = lock(&self.children).get(&pid) {
            let running = child.is_running();
            child.finish(None);
            return running;
        }
        self.remove_process(pid)
    }

    async fn is_port_free(&self, port: u16) -> bool {
        lock(&self.ports)
            .get(&port)
            .is_none_or(|holders| holders.is_empty())
    }

    async fn pids_on_port(&self, port: u16) -> Vec<u32> {
        self.log.record(format!("pids_on_port {port}"));
        lock(&self.ports).get(&port).cloned().unwrap_or_default()
    }
}

/// Output sink that keeps every line it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<OutputLine>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<OutputLine> {
        lock(&self.lines).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.lines).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutputSink for RecordingSink {
    fn emit(&self, line: &OutputLine) {
        lock(&self.lines).push(line.clone());
    }
}

/// Captures `tracing` output emitted on the current thread.
///
/// Works with the default current-thread `#[tokio::test]` runtime, where
/// spawned tasks run on the test thread.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Install a capturing subscriber until the returned guard is dropped.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&lock(&self.buffer))
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Warning lines containing `needle`.
    pub fn warnings(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains("WARN") && line.contains(needle))
            .collect()
    }
}

pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.buffer).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// A supervisor wired to fakes.
pub struct TestHarness {
    pub manager: SidecarManager,
    pub inventory: Arc<FakeInventory>,
    pub process: Arc<FakeProcessControl>,
    pub output: Arc<RecordingSink>,
    /// Shared by the inventory and process fakes.
    pub log: CallLog,
}

impl TestHarness {
    pub fn new(config: SupervisorConfig) -> Self {
        let log = CallLog::new();
        let inventory = Arc::new(FakeInventory::new(log.clone()));
        let process = Arc::new(FakeProcessControl::new(log.clone()));
        let output = Arc::new(RecordingSink::new());

        let manager = SidecarManager::with_collaborators(
            config,
            Collaborators {
                inventory: Arc::clone(&inventory) as Arc<dyn Inventory>,
                process: Arc::clone(&process) as Arc<dyn ProcessControl>,
                output: Arc::clone(&output) as Arc<dyn OutputSink>,
            },
        );

        Self {
            manager,
            inventory,
            process,
            output,
            log,
        }
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
