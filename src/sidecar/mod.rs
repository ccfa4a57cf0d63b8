//! Supervision of a local sidecar runtime process.
//!
//! The supervisor launches the sidecar CLI (`dapr run ...` by default) next
//! to the host application and keeps it alive:
//! - Evicts stale instances of the same app id and anything holding the
//!   sidecar's ports before every launch
//! - Captures the child's output, classifying it by log level
//! - Backfills ports the configuration left to the runtime, from the
//!   inventory, after the first output line
//! - Relaunches the sidecar from a heartbeat when the inventory loses it
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         SidecarManager                           │
//! │                                                                  │
//! │   start / refresh / stop / dispose / heartbeat tick              │
//! │         │            (one lock, one operation at a time)         │
//! │         ▼                                                        │
//! │   ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐ │
//! │   │ Stop previous│──▶│ Launch child │──▶│ Output consumer task │ │
//! │   │ evict ports  │   │              │   │ classify + ports     │ │
//! │   └──────────────┘   └──────────────┘   └──────────────────────┘ │
//! │         ▲                                                        │
//! │   ┌──────────────┐                                               │
//! │   │ Heartbeat    │  inventory says "gone" → start again          │
//! │   └──────────────┘                                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sidecar_supervisor::config::SupervisorConfig;
//! use sidecar_supervisor::sidecar::{SidecarManager, SidecarOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SidecarManager::new(SupervisorConfig::default());
//!
//! manager.start(&SidecarOptions::new("orders", 5000)).await?;
//! println!("sidecar is {}", manager.status());
//!
//! manager.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod inventory;
pub mod manager;
pub mod output;
pub mod process;

pub use command::{CommandBuilder, build_launch_args};
pub use config::{AppProtocol, PassThroughOptions, RuntimeConfig, SidecarOptions, compose_app_id};
pub use error::{Result, SidecarError};
pub use heartbeat::HeartbeatOutcome;
pub use inventory::{CliInventory, Inventory, RuntimeInstance};
pub use manager::{
    Collaborators, GRPC_PORT_ENV, HTTP_PORT_ENV, PortCompletion, SidecarManager, SidecarStatus,
};
pub use output::{ConsoleSink, OutputLevel, OutputLine, OutputSink, OutputStream, TracingSink};
pub use process::{
    ExitState, LaunchRequest, LaunchedProcess, OutputEvent, ProcessControl, ProcessHandle,
    ProcessInfo, SystemProcessControl,
};
