//! OS process primitives the supervisor is built on.
//!
//! [`ProcessControl`] is the seam between the supervisor's lifecycle logic
//! and the operating system: launching the sidecar with captured stdio,
//! looking up and killing processes by pid, and finding who holds a port.
//! [`SystemProcessControl`] is the real implementation; tests substitute
//! [`crate::testing::FakeProcessControl`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::sidecar::error::{Result, SidecarError};

/// How long the exit watcher waits for the stdio readers to drain.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Basic facts about a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// Exit status published once a launched process terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
}

/// Handle to a launched sidecar process.
///
/// Cheap to clone; every clone observes the same exit.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    exit: watch::Receiver<Option<ExitState>>,
}

impl ProcessHandle {
    pub fn new(pid: u32, exit: watch::Receiver<Option<ExitState>>) -> Self {
        Self { pid, exit }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The process has terminated.
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some() || self.exit.has_changed().is_err()
    }

    /// Wait up to `timeout` for the process to terminate.
    ///
    /// Returns `true` once it has exited. A watcher that went away without
    /// reporting counts as exited.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut exit = self.exit.clone();
        match tokio::time::timeout(timeout, exit.wait_for(|state| state.is_some())).await {
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

/// One event from a launched process, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Stdout(String),
    Stderr(String),
    /// Sent once, after the process terminated.
    Exited(Option<i32>),
}

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub executable: String,
    pub args: Vec<String>,
    /// Show a console window for the process (Windows only).
    pub visible: bool,
}

/// A freshly launched process with its event stream.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub handle: ProcessHandle,
    pub events: mpsc::UnboundedReceiver<OutputEvent>,
}

/// Process-level operations used by the supervisor.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Launch a process with captured stdout and stderr.
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess>;

    /// Look up a running process by pid.
    async fn find_process(&self, pid: u32) -> Option<ProcessInfo>;

    /// Ask a process to shut down. Returns `false` if no signal was delivered.
    async fn terminate(&self, pid: u32) -> bool;

    /// Forcefully kill a process. Returns `false` if no signal was delivered.
    async fn kill(&self, pid: u32) -> bool;

    /// Wait up to `timeout` for a launched process to exit.
    async fn wait_for_exit(&self, handle: &ProcessHandle, timeout: Duration) -> bool {
        handle.wait_for_exit(timeout).await
    }

    /// Nothing is listening on `port`.
    async fn is_port_free(&self, port: u16) -> bool;

    /// Pids of the processes bound to `port`.
    async fn pids_on_port(&self, port: u16) -> Vec<u32>;
}

/// [`ProcessControl`] backed by the operating system.
#[derive(Debug, Default)]
pub struct SystemProcessControl;

impl SystemProcessControl {
    pub fn new() -> Self {
        Self
    }

    /// Run `f` against a freshly refreshed view of one process.
    async fn with_process<T, F>(pid: u32, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&sysinfo::Process) -> T + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let pid = Pid::from_u32(pid);
            let mut system = System::new();
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            system.process(pid).map(f)
        })
        .await
        .ok()
        .flatten()
    }
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess> {
        let mut command = Command::new(&request.executable);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        if !request.visible {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|e| SidecarError::LaunchFailed {
            executable: request.executable.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| SidecarError::LaunchFailed {
            executable: request.executable.clone(),
            reason: "process exited before reporting a pid".to_string(),
        })?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let stdout_task = child
            .stdout
            .take()
            .map(|out| spawn_line_reader(out, events_tx.clone(), OutputEvent::Stdout));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| spawn_line_reader(err, events_tx.clone(), OutputEvent::Stderr));

        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!("Failed to wait for sidecar process {}: {}", pid, e);
                    None
                }
            };
            let _ = exit_tx.send(Some(ExitState { code }));

            let drain = async {
                for task in [stdout_task, stderr_task].into_iter().flatten() {
                    let _ = task.await;
                }
            };
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, drain).await.is_err() {
                tracing::debug!("Sidecar {} pipes still open after exit", pid);
            }
            let _ = events_tx.send(OutputEvent::Exited(code));
        });

        tracing::debug!(
            pid,
            visible = request.visible,
            "Launched {}",
            request.executable
        );

        Ok(LaunchedProcess {
            handle: ProcessHandle::new(pid, exit_rx),
            events,
        })
    }

    async fn find_process(&self, pid: u32) -> Option<ProcessInfo> {
        Self::with_process(pid, move |process| ProcessInfo {
            pid,
            name: process.name().to_string_lossy().into_owned(),
        })
        .await
    }

    async fn terminate(&self, pid: u32) -> bool {
        Self::with_process(pid, |process| {
            process
                .kill_with(Signal::Term)
                .unwrap_or_else(|| process.kill())
        })
        .await
        .unwrap_or(false)
    }

    async fn kill(&self, pid: u32) -> bool {
        Self::with_process(pid, |process| process.kill())
            .await
            .unwrap_or(false)
    }

    async fn is_port_free(&self, port: u16) -> bool {
        tokio::task::spawn_blocking(move || {
            if std::net::TcpListener::bind(("0.0.0.0", port)).is_err() {
                return false;
            }
            // Hosts without IPv6 only fail the second bind for unrelated reasons.
            match std::net::TcpListener::bind(("::", port)) {
                Ok(_) => true,
                Err(e) => e.kind() != std::io::ErrorKind::AddrInUse,
            }
        })
        .await
        .unwrap_or(false)
    }

    async fn pids_on_port(&self, port: u16) -> Vec<u32> {
        let own_pid = std::process::id();
        let lookup = tokio::task::spawn_blocking(move || {
            listeners::get_all()
                .map(|all| {
                    all.into_iter()
                        .filter(|listener| listener.socket.port() == port)
                        .map(|listener| listener.process.pid)
                        .collect::<Vec<u32>>()
                })
                .map_err(|e| e.to_string())
        })
        .await;

        let mut pids: Vec<u32> = match lookup {
            Ok(Ok(pids)) => pids.into_iter().filter(|pid| *pid != own_pid).collect(),
            Ok(Err(e)) => {
                tracing::warn!("Failed to enumerate listeners for port {}: {}", port, e);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Listener lookup task failed: {}", e);
                Vec::new()
            }
        };
        pids.sort_unstable();
        pids.dedup();
        pids
    }
}

fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::UnboundedSender<OutputEvent>,
    wrap: fn(String) -> OutputEvent,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(wrap(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Sidecar output stream closed: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_reports_exit() {
        let (tx, rx) = watch::channel(None);
        let handle = ProcessHandle::new(42, rx);

        assert!(!handle.has_exited());
        assert!(!handle.wait_for_exit(Duration::from_millis(10)).await);

        tx.send(Some(ExitState { code: Some(0) })).unwrap();
        assert!(handle.has_exited());
        assert!(handle.wait_for_exit(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_dropped_watcher_counts_as_exited() {
        let (tx, rx) = watch::channel(None);
        let handle = ProcessHandle::new(42, rx);
        drop(tx);

        assert!(handle.has_exited());
        assert!(handle.wait_for_exit(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_launch_missing_executable_fails() {
        let control = SystemProcessControl::new();
        let request = LaunchRequest {
            executable: "definitely-not-a-sidecar-binary".to_string(),
            args: Vec::new(),
            visible: false,
        };

        let err = control.launch(&request).await.unwrap_err();
        assert!(matches!(err, SidecarError::LaunchFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_streams_output_in_order() {
        let control = SystemProcessControl::new();
        let request = LaunchRequest {
            executable: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo 'level=info one'; echo 'level=warning two'; exit 3".to_string(),
            ],
            visible: false,
        };

        let mut launched = control.launch(&request).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = launched.events.recv().await {
            let done = matches!(event, OutputEvent::Exited(_));
            events.push(event);
            if done {
                break;
            }
        }

        assert_eq!(
            events,
            vec![
                OutputEvent::Stdout("level=info one".to_string()),
                OutputEvent::Stdout("level=warning two".to_string()),
                OutputEvent::Exited(Some(3)),
            ]
        );
        assert!(launched.handle.has_exited());
    }

    #[tokio::test]
    async fn test_port_in_use_is_not_free() {
        let listener = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let control = SystemProcessControl::new();
        assert!(!control.is_port_free(port).await);

        drop(listener);
        assert!(control.is_port_free(port).await);
    }

    #[tokio::test]
    async fn test_ipv6_only_holder_is_not_free() {
        let Ok(listener) = std::net::TcpListener::bind(("::1", 0)) else {
            return;
        };
        let port = listener.local_addr().unwrap().port();

        let control = SystemProcessControl::new();
        assert!(!control.is_port_free(port).await);
    }

    #[tokio::test]
    async fn test_own_pid_never_reported_on_port() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let control = SystemProcessControl::new();
        assert!(!control.pids_on_port(port).await.contains(&std::process::id()));
    }
}
